//! Keyword extraction: content words after stop-word removal.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Stop words, English + Vietnamese.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "shall", "can", "need", "dare", "ought", "used", "to", "of", "in", "for", "on", "with",
        "at", "by", "from", "as", "into", "through", "during", "before", "after", "above",
        "below", "between", "under", "again", "further", "then", "once", "here", "there",
        "when", "where", "why", "how", "all", "each", "few", "more", "most", "other", "some",
        "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just",
        "and", "but", "if", "or", "because", "until", "while", "this", "that", "these",
        "those", "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your",
        "yours", "yourself", "he", "him", "his", "himself", "she", "her", "hers", "herself",
        "it", "its", "itself", "they", "them", "their", "theirs", "what", "which", "who",
        "whom",
        // Vietnamese
        "và", "của", "là", "có", "được", "cho", "với", "này", "trong", "để", "các", "những",
        "một", "đã", "tôi", "bạn", "anh", "chị", "em", "ở", "tại", "khi", "thì", "mà", "nếu",
        "vì", "cũng", "như", "từ", "đến", "lại", "ra", "vào", "lên", "xuống", "rồi", "sẽ",
        "đang", "vẫn", "còn", "chỉ", "rất", "quá", "làm", "gì", "sao", "nào", "đâu", "ai",
        "bao", "nhiêu",
    ]
    .into_iter()
    .collect()
});

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-zÀ-ỹ][A-Za-zÀ-ỹ0-9]*").unwrap());

/// Whether a lowercased word is a stop word.
#[inline]
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(word)
}

/// Extract keywords in first-seen order: lowercased content words of at
/// least `min_length` characters, stop words removed, duplicates dropped.
pub fn extract_keywords(text: &str, min_length: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for m in WORD_RE.find_iter(&text.to_lowercase()) {
        let word = m.as_str();
        if word.chars().count() < min_length || is_stop_word(word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            out.push(word.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_stop_words_and_duplicates() {
        let kws = extract_keywords("the auth service and the auth token", 2);
        assert_eq!(kws, vec!["auth", "service", "token"]);
    }

    #[test]
    fn keeps_first_seen_order() {
        let kws = extract_keywords("postgres beats redis, redis beats files", 2);
        assert_eq!(kws, vec!["postgres", "beats", "redis", "files"]);
    }

    #[test]
    fn vietnamese_stop_words_removed() {
        let kws = extract_keywords("tôi đã gặp Alice ở quán", 2);
        assert!(!kws.contains(&"tôi".to_string()));
        assert!(kws.contains(&"alice".to_string()));
    }

    #[test]
    fn empty_input_yields_empty() {
        assert!(extract_keywords("", 2).is_empty());
    }
}
