//! Query parsing: turns a query string into a `Stimulus`.
//!
//! A stimulus is the activation signal set a query injects into the graph:
//! entities, keywords, time hints, and an intent, each mapped to anchor
//! candidates with type-based seed weights.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::keywords::{extract_keywords, is_stop_word};
use super::temporal::{extract_time_hints, TimeHint};
use crate::core::NeuronType;

// ============================================================================
// INTENT
// ============================================================================

/// What kind of answer the query is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// "what is X": simple fact lookup.
    #[default]
    AskWhat,
    /// "who ...": entity lookup.
    AskWho,
    /// "when ...": temporal lookup.
    AskWhen,
    /// "where ...": spatial lookup.
    AskWhere,
    /// "why ...": causal chain exploration.
    AskWhy,
    /// "how ...": procedural exploration.
    AskHow,
    /// "how did I feel ...": emotional exploration.
    AskFeeling,
    /// "do I usually ...": cross-time pattern mining.
    AskPattern,
    /// "X or Y" / "compare ...": comparison.
    Compare,
    /// Anything else: free recall.
    Recall,
}

// ============================================================================
// STIMULUS
// ============================================================================

/// An anchor candidate derived from the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorCandidate {
    /// Text to resolve against neuron content.
    pub text: String,
    /// Expected neuron type.
    #[serde(rename = "type")]
    pub neuron_type: NeuronType,
    /// Seed activation weight.
    pub weight: f64,
}

/// Parsed activation signals for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stimulus {
    pub raw_query: String,
    /// Capitalized tokens, quoted spans, dotted names.
    pub entities: Vec<String>,
    /// Content words after stop-word removal.
    pub keywords: Vec<String>,
    /// Recognized time expressions.
    pub time_hints: Vec<TimeHint>,
    pub intent: QueryIntent,
    /// Anchor candidates ordered time → entity → action → concept.
    pub anchors: Vec<AnchorCandidate>,
}

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]{2,60})"|'([^']{2,60})'"#).unwrap());
static CAPITALIZED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9]+\b").unwrap());
static DOTTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z0-9][a-z0-9\-]*(?:\.[a-z0-9][a-z0-9\-]*)+\b").unwrap());

/// Verbs that commonly carry the action of a memory.
static ACTION_VERBS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "decide", "decided", "suggest", "suggested", "discuss", "discussed", "meet", "met",
        "deploy", "deployed", "fix", "fixed", "build", "built", "ship", "shipped", "review",
        "reviewed", "merge", "merged", "test", "tested", "write", "wrote", "plan", "planned",
        "choose", "chose", "agree", "agreed", "launch", "launched", "use", "used",
    ]
});

/// Whether a lowercased word reads as an action verb.
pub fn is_action_verb(word: &str) -> bool {
    ACTION_VERBS.contains(&word)
}

/// Deterministic query parser. No network, no models.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryParser;

impl QueryParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a query into a stimulus relative to `reference`.
    pub fn parse(&self, query: &str, reference: DateTime<Utc>) -> Stimulus {
        let entities = extract_entities(query);
        let keywords = extract_keywords(query, 2);
        let time_hints = extract_time_hints(query, reference);
        let intent = detect_intent(query);

        let mut anchors = Vec::new();
        for hint in &time_hints {
            anchors.push(AnchorCandidate {
                text: hint.phrase.clone(),
                neuron_type: NeuronType::Time,
                weight: NeuronType::Time.anchor_weight(),
            });
        }
        for entity in &entities {
            anchors.push(AnchorCandidate {
                text: entity.clone(),
                neuron_type: NeuronType::Entity,
                weight: NeuronType::Entity.anchor_weight(),
            });
        }
        let entity_lower: Vec<String> = entities.iter().map(|e| e.to_lowercase()).collect();
        for keyword in &keywords {
            if entity_lower.iter().any(|e| e.contains(keyword.as_str())) {
                continue;
            }
            let (neuron_type, weight) = if ACTION_VERBS.contains(&keyword.as_str()) {
                (NeuronType::Action, NeuronType::Action.anchor_weight())
            } else {
                (NeuronType::Concept, NeuronType::Concept.anchor_weight())
            };
            anchors.push(AnchorCandidate {
                text: keyword.clone(),
                neuron_type,
                weight,
            });
        }

        Stimulus {
            raw_query: query.to_string(),
            entities,
            keywords,
            time_hints,
            intent,
            anchors,
        }
    }
}

/// Capitalized tokens (outside sentence starts), quoted spans, and dotted
/// names count as entities.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push_unique = |candidate: String| {
        if !out.iter().any(|e| e.eq_ignore_ascii_case(&candidate)) {
            out.push(candidate);
        }
    };

    for cap in QUOTED_RE.captures_iter(text) {
        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
            push_unique(m.as_str().trim().to_string());
        }
    }

    for m in CAPITALIZED_RE.find_iter(text) {
        // Skip a capitalized word that merely opens the sentence, unless it
        // is capitalized mid-word too ("JWT", "PostgreSQL").
        let at_sentence_start = m.start() == 0
            || text[..m.start()]
                .trim_end()
                .ends_with(['.', '!', '?']);
        let token = m.as_str();
        let mixed_case = token.chars().skip(1).any(|c| c.is_uppercase());
        if at_sentence_start && !mixed_case {
            continue;
        }
        if is_stop_word(&token.to_lowercase()) {
            continue;
        }
        push_unique(token.to_string());
    }

    for m in DOTTED_RE.find_iter(text) {
        push_unique(m.as_str().to_string());
    }

    out
}

fn detect_intent(query: &str) -> QueryIntent {
    let lower = query.trim().to_lowercase();

    if lower.contains("feel") || lower.contains("feeling") || lower.contains("mood") {
        return QueryIntent::AskFeeling;
    }
    if lower.contains("usually") || lower.contains("habit") || lower.contains("pattern")
        || lower.contains("tend to")
    {
        return QueryIntent::AskPattern;
    }
    if lower.starts_with("why") || lower.contains(" why ") {
        return QueryIntent::AskWhy;
    }
    if lower.starts_with("how") {
        return QueryIntent::AskHow;
    }
    if lower.starts_with("who") {
        return QueryIntent::AskWho;
    }
    if lower.starts_with("when") {
        return QueryIntent::AskWhen;
    }
    if lower.starts_with("where") {
        return QueryIntent::AskWhere;
    }
    if lower.contains("compare") || lower.contains(" vs ") || lower.contains(" versus ") {
        return QueryIntent::Compare;
    }
    if lower.starts_with("what") {
        return QueryIntent::AskWhat;
    }
    QueryIntent::Recall
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn entities_skip_sentence_initial_capital() {
        let entities = extract_entities("What did Alice suggest?");
        assert_eq!(entities, vec!["Alice"]);
    }

    #[test]
    fn mixed_case_entity_kept_even_at_start() {
        let entities = extract_entities("PostgreSQL is the default");
        assert_eq!(entities, vec!["PostgreSQL"]);
    }

    #[test]
    fn dotted_hostnames_are_entities() {
        let entities = extract_entities("what is the host db.example.com doing");
        assert!(entities.contains(&"db.example.com".to_string()));
    }

    #[test]
    fn quoted_spans_are_entities() {
        let entities = extract_entities(r#"notes about "retry loop" behavior"#);
        assert!(entities.contains(&"retry loop".to_string()));
    }

    #[test]
    fn intent_detection_ladder() {
        assert_eq!(detect_intent("why did we pick redis?"), QueryIntent::AskWhy);
        assert_eq!(detect_intent("when was the launch?"), QueryIntent::AskWhen);
        assert_eq!(
            detect_intent("do I usually deploy on Fridays?"),
            QueryIntent::AskPattern
        );
        assert_eq!(
            detect_intent("how did I feel about the rewrite?"),
            QueryIntent::AskFeeling
        );
        assert_eq!(detect_intent("what is the db host?"), QueryIntent::AskWhat);
        assert_eq!(detect_intent("database choice"), QueryIntent::Recall);
    }

    #[test]
    fn anchors_order_time_first_then_entities() {
        let stim = QueryParser::new().parse("What did Alice suggest yesterday?", reference());
        assert_eq!(stim.anchors[0].neuron_type, NeuronType::Time);
        assert_eq!(stim.anchors[0].weight, 1.0);
        let alice = stim
            .anchors
            .iter()
            .find(|a| a.text == "Alice")
            .expect("entity anchor");
        assert_eq!(alice.weight, 0.8);
        let suggest = stim
            .anchors
            .iter()
            .find(|a| a.text == "suggest")
            .expect("action anchor");
        assert_eq!(suggest.neuron_type, NeuronType::Action);
        assert_eq!(suggest.weight, 0.6);
    }

    #[test]
    fn keywords_covered_by_entities_are_not_duplicated() {
        let stim = QueryParser::new().parse("What did Alice suggest?", reference());
        let alice_anchors = stim.anchors.iter().filter(|a| a.text.eq_ignore_ascii_case("alice"));
        assert_eq!(alice_anchors.count(), 1);
    }
}
