//! Conflict detection and auto-resolution.
//!
//! New memories are checked against what the brain already believes.
//! Predicate tuples `(subject, verb, object)` come from regex extraction;
//! a matching subject+verb with an incompatible object raises a conflict.
//! Trivial conflicts auto-resolve with conservative rules; everything else
//! is recorded as disputed and left for the caller.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{evaluate_freshness, FreshnessLevel, Metadata, Neuron};

/// A `(subject, verb, object)` claim extracted from text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub subject: String,
    pub verb: String,
    pub object: String,
}

/// A detected contradiction between a new claim and a stored one.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub new_predicate: Predicate,
    pub existing_predicate: Predicate,
    /// Neuron holding the existing claim's object.
    pub existing_neuron_id: String,
}

/// Outcome of attempting auto-resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The new memory wins; the existing one is superseded.
    KeepNew,
    /// The existing memory wins; the new one is marked disputed.
    KeepExisting,
    /// Both stay disputed until someone decides.
    Manual,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepNew => "keep_new",
            Resolution::KeepExisting => "keep_existing",
            Resolution::Manual => "manual",
        }
    }
}

/// An auto-resolution decision with its audit trail.
#[derive(Debug, Clone)]
pub struct AutoResolution {
    pub resolution: Resolution,
    pub reason: String,
}

static DECISION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(we|i|they|the team)\s+(decided to use|decided on|chose|picked|selected|switched to|agreed on|will use)\s+([A-Za-z0-9._\-]+)",
    )
    .unwrap()
});

static ASSIGNMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([a-z][a-z0-9 ._\-]{2,40}?)\s+(is|are|was set to|is set to|equals|runs on)\s+([A-Za-z0-9._\-]+)",
    )
    .unwrap()
});

/// Extract predicate tuples from text. Never fails; returns what matches.
pub fn extract_predicates(text: &str) -> Vec<Predicate> {
    let mut out = Vec::new();

    for cap in DECISION_RE.captures_iter(text) {
        out.push(Predicate {
            subject: cap[1].to_lowercase(),
            verb: canonical_verb(&cap[2]),
            object: cap[3].to_lowercase(),
        });
    }

    for cap in ASSIGNMENT_RE.captures_iter(text) {
        let subject = cap[1].trim().to_lowercase();
        // Pronouns and decision verbs already handled above.
        if subject == "we" || subject == "i" || subject == "they" {
            continue;
        }
        out.push(Predicate {
            subject,
            verb: canonical_verb(&cap[2]),
            object: cap[3].to_lowercase(),
        });
    }

    out
}

/// Collapse verb variants so "chose" and "decided to use" compare equal.
fn canonical_verb(verb: &str) -> String {
    let v = verb.to_lowercase();
    match v.as_str() {
        "decided to use" | "decided on" | "chose" | "picked" | "selected" | "switched to"
        | "agreed on" | "will use" => "decided".to_string(),
        "is" | "are" | "was set to" | "is set to" | "equals" => "is".to_string(),
        other => other.to_string(),
    }
}

/// Whether two predicates contradict: same subject and verb, different
/// object.
pub fn contradicts(a: &Predicate, b: &Predicate) -> bool {
    a.subject == b.subject && a.verb == b.verb && a.object != b.object
}

/// Conservative auto-resolution rules, in priority order:
///
/// 1. Existing is stale or ancient → keep new.
/// 2. Same session (existing under an hour old) and the new claim is more
///    specific (longer object) → keep new, treated as a correction.
/// 3. Existing was already superseded before → keep new.
/// 4. Otherwise → manual.
pub fn try_auto_resolve(
    conflict: &Conflict,
    existing_neuron: &Neuron,
    now: chrono::DateTime<chrono::Utc>,
) -> AutoResolution {
    let freshness = evaluate_freshness(existing_neuron.created_at, now);

    if matches!(
        freshness.level,
        FreshnessLevel::Stale | FreshnessLevel::Ancient
    ) {
        return AutoResolution {
            resolution: Resolution::KeepNew,
            reason: format!(
                "existing claim is {} ({} days old)",
                freshness.level.as_str(),
                freshness.age_days
            ),
        };
    }

    let age_seconds = (now - existing_neuron.created_at).num_seconds();
    if age_seconds < 3600 && conflict.new_predicate.object.len() > conflict.existing_predicate.object.len()
    {
        return AutoResolution {
            resolution: Resolution::KeepNew,
            reason: "same-session correction, new claim is more specific".to_string(),
        };
    }

    if existing_neuron.is_superseded() {
        return AutoResolution {
            resolution: Resolution::KeepNew,
            reason: "existing claim was already superseded".to_string(),
        };
    }

    AutoResolution {
        resolution: Resolution::Manual,
        reason: "no auto-resolve rule matched".to_string(),
    }
}

/// Metadata stamped on a CONTRADICTS synapse for auditability.
pub fn conflict_metadata(resolution: &AutoResolution) -> Metadata {
    let mut m = Metadata::new();
    m.insert(
        "_resolution".to_string(),
        serde_json::Value::String(resolution.resolution.as_str().to_string()),
    );
    m.insert(
        "_resolution_reason".to_string(),
        serde_json::Value::String(resolution.reason.clone()),
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NeuronType;
    use chrono::{Duration, Utc};

    #[test]
    fn decision_predicates_extract_subject_verb_object() {
        let preds = extract_predicates("We decided to use PostgreSQL for the main store");
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].subject, "we");
        assert_eq!(preds[0].verb, "decided");
        assert_eq!(preds[0].object, "postgresql");
    }

    #[test]
    fn assignment_predicates_extract() {
        let preds = extract_predicates("Database host is db.example.com");
        assert!(preds
            .iter()
            .any(|p| p.subject.contains("host") && p.verb == "is" && p.object == "db.example.com"));
    }

    #[test]
    fn different_objects_on_same_claim_contradict() {
        let a = extract_predicates("We decided to use PostgreSQL").remove(0);
        let b = extract_predicates("We chose MongoDB").remove(0);
        assert!(contradicts(&a, &b));
        assert!(!contradicts(&a, &a));
    }

    fn conflict_with(existing_object: &str, new_object: &str) -> Conflict {
        Conflict {
            new_predicate: Predicate {
                subject: "we".into(),
                verb: "decided".into(),
                object: new_object.into(),
            },
            existing_predicate: Predicate {
                subject: "we".into(),
                verb: "decided".into(),
                object: existing_object.into(),
            },
            existing_neuron_id: "n1".into(),
        }
    }

    #[test]
    fn stale_existing_resolves_to_keep_new() {
        let now = Utc::now();
        let mut neuron = Neuron::new(NeuronType::Concept, "postgresql");
        neuron.created_at = now - Duration::days(45);

        let res = try_auto_resolve(&conflict_with("postgresql", "mongodb"), &neuron, now);
        assert_eq!(res.resolution, Resolution::KeepNew);
    }

    #[test]
    fn fresh_high_stakes_conflict_goes_manual() {
        let now = Utc::now();
        let mut neuron = Neuron::new(NeuronType::Concept, "postgresql");
        neuron.created_at = now - Duration::days(2);

        let res = try_auto_resolve(&conflict_with("postgresql", "mongodb"), &neuron, now);
        assert_eq!(res.resolution, Resolution::Manual);
    }

    #[test]
    fn same_session_correction_keeps_new() {
        let now = Utc::now();
        let mut neuron = Neuron::new(NeuronType::Concept, "db");
        neuron.created_at = now - Duration::minutes(10);

        let res = try_auto_resolve(&conflict_with("db", "db.example.com"), &neuron, now);
        assert_eq!(res.resolution, Resolution::KeepNew);
    }
}
