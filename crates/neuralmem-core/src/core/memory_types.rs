//! Typed memories: per-type defaults for salience, decay, and expiry.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// High-level category of an encoded memory, chosen by the caller or
/// suggested from the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// A discrete fact.
    #[default]
    Fact,
    /// A decision that was made.
    Decision,
    /// Something to do. Expires after 30 days.
    Todo,
    /// Ambient context. Expires after 7 days.
    Context,
    /// A standing instruction or procedure.
    Instruction,
    /// A pointer to an external resource.
    Reference,
    /// Something that happened.
    Event,
    /// A reflection or conclusion.
    Insight,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Decision => "decision",
            MemoryType::Todo => "todo",
            MemoryType::Context => "context",
            MemoryType::Instruction => "instruction",
            MemoryType::Reference => "reference",
            MemoryType::Event => "event",
            MemoryType::Insight => "insight",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "fact" => MemoryType::Fact,
            "decision" => MemoryType::Decision,
            "todo" => MemoryType::Todo,
            "context" => MemoryType::Context,
            "instruction" => MemoryType::Instruction,
            "reference" => MemoryType::Reference,
            "event" => MemoryType::Event,
            "insight" => MemoryType::Insight,
            _ => MemoryType::Fact,
        }
    }

    /// Default fiber salience for this type.
    pub fn default_salience(&self) -> f64 {
        match self {
            MemoryType::Decision => 0.9,
            MemoryType::Insight => 0.7,
            MemoryType::Fact | MemoryType::Instruction => 0.6,
            MemoryType::Todo | MemoryType::Event => 0.5,
            MemoryType::Reference => 0.4,
            MemoryType::Context => 0.3,
        }
    }

    /// Per-day decay rate applied to member neurons.
    pub fn decay_rate(&self) -> f64 {
        match self {
            MemoryType::Fact | MemoryType::Decision | MemoryType::Instruction => 0.02,
            MemoryType::Insight => 0.03,
            MemoryType::Reference | MemoryType::Event => 0.05,
            MemoryType::Context => 0.10,
            MemoryType::Todo => 0.15,
        }
    }

    /// How long the fiber's validity window stays open, if bounded.
    pub fn expiry(&self) -> Option<Duration> {
        match self {
            MemoryType::Todo => Some(Duration::days(30)),
            MemoryType::Context => Some(Duration::days(7)),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Guess a memory type from the text when the caller does not supply one.
pub fn suggest_memory_type(content: &str) -> MemoryType {
    let lower = content.to_lowercase();

    let decision_cues = ["decided", "decision", "we chose", "agreed to", "settled on"];
    if decision_cues.iter().any(|c| lower.contains(c)) {
        return MemoryType::Decision;
    }

    let todo_cues = ["todo", "need to", "remember to", "don't forget", "must "];
    if todo_cues.iter().any(|c| lower.contains(c)) {
        return MemoryType::Todo;
    }

    let instruction_cues = ["how to", "always ", "never ", "step 1", "first,"];
    if instruction_cues.iter().any(|c| lower.contains(c)) {
        return MemoryType::Instruction;
    }

    if lower.contains("http://") || lower.contains("https://") || lower.contains("see docs") {
        return MemoryType::Reference;
    }

    let insight_cues = ["realized", "learned that", "turns out", "insight"];
    if insight_cues.iter().any(|c| lower.contains(c)) {
        return MemoryType::Insight;
    }

    let event_cues = ["met ", "happened", "yesterday", "this morning", "attended"];
    if event_cues.iter().any(|c| lower.contains(c)) {
        return MemoryType::Event;
    }

    MemoryType::Fact
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_roundtrip() {
        for t in [
            MemoryType::Fact,
            MemoryType::Decision,
            MemoryType::Todo,
            MemoryType::Context,
            MemoryType::Instruction,
            MemoryType::Reference,
            MemoryType::Event,
            MemoryType::Insight,
        ] {
            assert_eq!(MemoryType::parse_name(t.as_str()), t);
        }
    }

    #[test]
    fn todo_and_context_expire_others_do_not() {
        assert_eq!(MemoryType::Todo.expiry(), Some(Duration::days(30)));
        assert_eq!(MemoryType::Context.expiry(), Some(Duration::days(7)));
        assert_eq!(MemoryType::Fact.expiry(), None);
        assert_eq!(MemoryType::Decision.expiry(), None);
    }

    #[test]
    fn suggestion_picks_up_cues() {
        assert_eq!(
            suggest_memory_type("We decided to use PostgreSQL"),
            MemoryType::Decision
        );
        assert_eq!(
            suggest_memory_type("TODO: rotate the API keys"),
            MemoryType::Todo
        );
        assert_eq!(
            suggest_memory_type("Met Alice at the coffee shop"),
            MemoryType::Event
        );
        assert_eq!(
            suggest_memory_type("The database host is db.example.com"),
            MemoryType::Fact
        );
    }

    #[test]
    fn decay_rates_match_type_table() {
        assert_eq!(MemoryType::Fact.decay_rate(), 0.02);
        assert_eq!(MemoryType::Todo.decay_rate(), 0.15);
        assert_eq!(MemoryType::Context.decay_rate(), 0.10);
        assert_eq!(MemoryType::Reference.decay_rate(), 0.05);
    }
}
