//! Tokenizer interface.
//!
//! Language-specific tokenization lives outside the engine; the core only
//! needs a word stream. Each brain owns one tokenizer instance for its
//! lifetime.

use once_cell::sync::Lazy;
use regex::Regex;

/// Word stream provider. Implementations must be deterministic.
pub trait Tokenizer: Send + Sync {
    /// Split text into tokens, preserving original casing.
    fn tokenize(&self, text: &str) -> Vec<String>;
}

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-zÀ-ỹ0-9][A-Za-zÀ-ỹ0-9._\-]*").unwrap());

/// Default regex tokenizer. Keeps dotted and hyphenated tokens
/// ("db.example.com", "retry-loop") intact, which entity extraction needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexTokenizer;

impl Tokenizer for RegexTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        TOKEN_RE
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', '-']).to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_hostnames_whole() {
        let tokens = RegexTokenizer.tokenize("Database host is db.example.com.");
        assert!(tokens.contains(&"db.example.com".to_string()));
    }

    #[test]
    fn strips_trailing_punctuation() {
        let tokens = RegexTokenizer.tokenize("Met Alice.");
        assert_eq!(tokens, vec!["Met", "Alice"]);
    }
}
