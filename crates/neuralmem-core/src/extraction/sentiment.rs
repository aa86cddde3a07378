//! Lexicon-based sentiment extraction.
//!
//! Valence and intensity come from positive/negative word lists (English +
//! Vietnamese) with a three-word negation window and intensity modifiers.
//! Emotion tags classify the dominant feeling so the encoder can wire FELT
//! synapses to the brain's singleton emotion neurons.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Sentiment polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// Result of sentiment analysis over one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentResult {
    pub valence: Valence,
    /// Strength of the feeling, within `[0, 1]`.
    pub intensity: f64,
    /// Dominant emotion labels ("joy", "frustration", "urgency", ...).
    pub emotion_tags: Vec<String>,
}

impl SentimentResult {
    /// Neutral, zero-intensity result.
    pub fn neutral() -> Self {
        Self {
            valence: Valence::Neutral,
            intensity: 0.0,
            emotion_tags: Vec::new(),
        }
    }
}

/// word -> (polarity score in [-1, 1], emotion tag)
static LEXICON: Lazy<HashMap<&'static str, (f64, &'static str)>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let positive: &[(&str, &str)] = &[
        ("good", "joy"),
        ("great", "joy"),
        ("excellent", "joy"),
        ("amazing", "joy"),
        ("awesome", "joy"),
        ("fantastic", "joy"),
        ("wonderful", "joy"),
        ("love", "joy"),
        ("loved", "joy"),
        ("like", "joy"),
        ("liked", "joy"),
        ("enjoy", "joy"),
        ("enjoyed", "joy"),
        ("happy", "joy"),
        ("glad", "joy"),
        ("excited", "joy"),
        ("exciting", "joy"),
        ("thrilled", "joy"),
        ("delighted", "joy"),
        ("pleased", "joy"),
        ("proud", "joy"),
        ("success", "joy"),
        ("successful", "joy"),
        ("win", "joy"),
        ("won", "joy"),
        ("works", "joy"),
        ("worked", "joy"),
        ("fixed", "joy"),
        ("solved", "joy"),
        ("resolved", "joy"),
        ("breakthrough", "surprise"),
        ("finally", "joy"),
        ("clean", "joy"),
        ("fast", "joy"),
        ("faster", "joy"),
        ("reliable", "joy"),
        ("stable", "joy"),
        ("elegant", "joy"),
        ("simple", "joy"),
        ("helpful", "joy"),
        ("useful", "joy"),
        ("perfect", "joy"),
        ("better", "joy"),
        ("best", "joy"),
        ("improved", "joy"),
        ("improvement", "joy"),
        ("smooth", "joy"),
        ("easy", "joy"),
        ("nice", "joy"),
        ("brilliant", "joy"),
        ("interesting", "surprise"),
        ("surprising", "surprise"),
        ("unexpected", "surprise"),
        ("discovered", "surprise"),
        ("learned", "surprise"),
        // Vietnamese
        ("tốt", "joy"),
        ("tuyệt", "joy"),
        ("hay", "joy"),
        ("vui", "joy"),
        ("thích", "joy"),
        ("yêu", "joy"),
        ("đẹp", "joy"),
        ("giỏi", "joy"),
        ("nhanh", "joy"),
        ("dễ", "joy"),
        ("ổn", "joy"),
        ("thành công", "joy"),
    ];
    let negative: &[(&str, &str)] = &[
        ("bad", "frustration"),
        ("terrible", "frustration"),
        ("awful", "frustration"),
        ("horrible", "frustration"),
        ("hate", "frustration"),
        ("hated", "frustration"),
        ("angry", "frustration"),
        ("annoyed", "frustration"),
        ("annoying", "frustration"),
        ("frustrated", "frustration"),
        ("frustrating", "frustration"),
        ("broken", "frustration"),
        ("broke", "frustration"),
        ("fail", "frustration"),
        ("failed", "frustration"),
        ("failure", "frustration"),
        ("failing", "frustration"),
        ("bug", "frustration"),
        ("buggy", "frustration"),
        ("crash", "urgency"),
        ("crashed", "urgency"),
        ("error", "frustration"),
        ("errors", "frustration"),
        ("slow", "frustration"),
        ("slower", "frustration"),
        ("worse", "frustration"),
        ("worst", "frustration"),
        ("wrong", "frustration"),
        ("painful", "frustration"),
        ("pain", "frustration"),
        ("messy", "frustration"),
        ("ugly", "frustration"),
        ("confusing", "confusion"),
        ("confused", "confusion"),
        ("unclear", "confusion"),
        ("stuck", "confusion"),
        ("lost", "confusion"),
        ("worried", "urgency"),
        ("worry", "urgency"),
        ("urgent", "urgency"),
        ("critical", "urgency"),
        ("emergency", "urgency"),
        ("deadline", "urgency"),
        ("blocked", "urgency"),
        ("blocker", "urgency"),
        ("outage", "urgency"),
        ("down", "urgency"),
        ("regression", "frustration"),
        ("flaky", "frustration"),
        ("leak", "urgency"),
        ("sad", "frustration"),
        ("tired", "frustration"),
        ("scared", "urgency"),
        ("afraid", "urgency"),
        // Vietnamese
        ("xấu", "frustration"),
        ("tệ", "frustration"),
        ("chán", "frustration"),
        ("buồn", "frustration"),
        ("ghét", "frustration"),
        ("lỗi", "frustration"),
        ("hỏng", "frustration"),
        ("chậm", "frustration"),
        ("khó", "confusion"),
        ("sợ", "urgency"),
        ("gấp", "urgency"),
        ("lo", "urgency"),
    ];
    for (w, tag) in positive {
        m.insert(*w, (1.0, *tag));
    }
    for (w, tag) in negative {
        m.insert(*w, (-1.0, *tag));
    }
    m
});

static NEGATIONS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "won't", "can't", "couldn't",
    "shouldn't", "isn't", "wasn't", "without", "hardly", "không", "chưa", "chẳng",
];

/// word -> intensity multiplier
static MODIFIERS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    [
        ("very", 1.5),
        ("extremely", 1.8),
        ("really", 1.4),
        ("so", 1.3),
        ("incredibly", 1.8),
        ("totally", 1.5),
        ("absolutely", 1.6),
        ("slightly", 0.5),
        ("somewhat", 0.6),
        ("a", 1.0),
        ("rất", 1.5),
        ("quá", 1.5),
        ("hơi", 0.6),
        ("cực", 1.8),
    ]
    .into_iter()
    .collect()
});

/// Analyze sentiment of a text.
///
/// Never fails: text without lexicon hits returns a neutral result.
pub fn extract_sentiment(text: &str) -> SentimentResult {
    let words: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let mut score_sum = 0.0;
    let mut hit_count = 0u32;
    let mut tag_counts: HashMap<&'static str, u32> = HashMap::new();

    for (i, word) in words.iter().enumerate() {
        let Some(&(polarity, tag)) = LEXICON.get(word.as_str()) else {
            continue;
        };

        // Negation flips polarity within a three-word window.
        let negated = (i.saturating_sub(3)..i).any(|j| NEGATIONS.contains(&words[j].as_str()));
        // Modifiers scale intensity from the immediately preceding word.
        let modifier = i
            .checked_sub(1)
            .and_then(|j| MODIFIERS.get(words[j].as_str()))
            .copied()
            .unwrap_or(1.0);

        let effective = if negated { -polarity * 0.7 } else { polarity };
        score_sum += effective * modifier;
        hit_count += 1;
        if !negated {
            *tag_counts.entry(tag).or_insert(0) += 1;
        }
    }

    if hit_count == 0 {
        return SentimentResult::neutral();
    }

    let mean = score_sum / hit_count as f64;
    let valence = if mean > 0.15 {
        Valence::Positive
    } else if mean < -0.15 {
        Valence::Negative
    } else {
        Valence::Neutral
    };
    // Intensity grows with both polarity strength and hit density.
    let density = (hit_count as f64 / words.len().max(1) as f64).min(1.0);
    let intensity = (mean.abs() * (0.6 + 0.4 * density)).clamp(0.0, 1.0);

    let mut tags: Vec<(&str, u32)> = tag_counts.into_iter().collect();
    tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let emotion_tags = tags.into_iter().map(|(t, _)| t.to_string()).collect();

    SentimentResult {
        valence,
        intensity,
        emotion_tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_text_scores_positive() {
        let s = extract_sentiment("the new cache is great, queries are fast");
        assert_eq!(s.valence, Valence::Positive);
        assert!(s.intensity > 0.3);
        assert_eq!(s.emotion_tags[0], "joy");
    }

    #[test]
    fn negative_text_scores_negative() {
        let s = extract_sentiment("the deploy failed and the dashboard is broken");
        assert_eq!(s.valence, Valence::Negative);
        assert!(s.emotion_tags.contains(&"frustration".to_string()));
    }

    #[test]
    fn negation_flips_polarity() {
        let s = extract_sentiment("this is not good at all");
        assert_eq!(s.valence, Valence::Negative);
    }

    #[test]
    fn intensifier_raises_intensity() {
        let plain = extract_sentiment("the outage was bad");
        let boosted = extract_sentiment("the outage was extremely bad");
        assert!(boosted.intensity > plain.intensity);
    }

    #[test]
    fn urgency_markers_tag_urgency() {
        let s = extract_sentiment("critical outage, production is down");
        assert_eq!(s.valence, Valence::Negative);
        assert_eq!(s.emotion_tags[0], "urgency");
    }

    #[test]
    fn neutral_text_is_neutral() {
        let s = extract_sentiment("the meeting is at three on Tuesday");
        assert_eq!(s.valence, Valence::Neutral);
        assert_eq!(s.intensity, 0.0);
    }

    #[test]
    fn vietnamese_lexicon_hits() {
        let s = extract_sentiment("dự án chạy rất tốt");
        assert_eq!(s.valence, Valence::Positive);
    }
}
