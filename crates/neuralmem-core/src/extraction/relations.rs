//! Relation extraction: causal, comparative, and sequential patterns.
//!
//! Pure regex over the encoded text; each match maps two spans onto a typed
//! synapse candidate with a per-pattern confidence. English and Vietnamese
//! markers are covered. No network, no models.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::SynapseType;

/// Family a relation pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationFamily {
    Causal,
    Comparative,
    Sequential,
}

/// A relation between two text spans, ready to become a synapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationCandidate {
    pub source_span: String,
    pub target_span: String,
    pub family: RelationFamily,
    pub synapse_type: SynapseType,
    pub confidence: f64,
}

struct PatternEntry {
    regex: Regex,
    synapse_type: SynapseType,
    family: RelationFamily,
    confidence: f64,
    /// When true the capture groups are (target, source).
    reversed: bool,
}

fn entry(
    pattern: &str,
    synapse_type: SynapseType,
    family: RelationFamily,
    confidence: f64,
    reversed: bool,
) -> PatternEntry {
    PatternEntry {
        regex: Regex::new(pattern).expect("relation pattern must compile"),
        synapse_type,
        family,
        confidence,
        reversed,
    }
}

static CAUSAL: Lazy<Vec<PatternEntry>> = Lazy::new(|| {
    use RelationFamily::Causal;
    use SynapseType::{CausedBy, LeadsTo};
    vec![
        // "X because Y" → X CAUSED_BY Y
        entry(
            r"(?i)(.{5,80}?)\s+because\s+(.{5,80}?)(?:\.|;|,\s+(?:and|but)|$)",
            CausedBy,
            Causal,
            0.80,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+(?:caused\s+by|due\s+to)\s+(.{5,80}?)(?:\.|;|,\s+(?:and|but)|$)",
            CausedBy,
            Causal,
            0.85,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+as\s+a\s+result\s+of\s+(.{5,80}?)(?:\.|;|,\s+(?:and|but)|$)",
            CausedBy,
            Causal,
            0.80,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+(?:therefore|thus|hence|consequently)\s+(.{5,80}?)(?:\.|;|$)",
            LeadsTo,
            Causal,
            0.75,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+so\s+(?:that\s+)?(.{5,80}?)(?:\.|;|$)",
            LeadsTo,
            Causal,
            0.65,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+(?:leads?\s+to|results?\s+in|causes?)\s+(.{5,80}?)(?:\.|;|$)",
            LeadsTo,
            Causal,
            0.85,
            false,
        ),
        // Vietnamese: "X vì Y" → X CAUSED_BY Y
        entry(
            r"(?i)(.{5,80}?)\s+(?:vì|do|bởi\s+vì)\s+(.{5,80}?)(?:\.|;|$)",
            CausedBy,
            Causal,
            0.80,
            false,
        ),
        // Vietnamese: "X nên Y" → X LEADS_TO Y
        entry(
            r"(?i)(.{5,80}?)\s+(?:nên|cho\s+nên|vì\s+vậy|do\s+đó)\s+(.{5,80}?)(?:\.|;|$)",
            LeadsTo,
            Causal,
            0.80,
            false,
        ),
    ]
});

static COMPARATIVE: Lazy<Vec<PatternEntry>> = Lazy::new(|| {
    use RelationFamily::Comparative;
    use SynapseType::{Contradicts, SimilarTo};
    vec![
        entry(
            r"(?i)(.{3,60}?)\s+(?:better|worse|faster|slower|bigger|smaller|more\s+\w+|less\s+\w+)\s+than\s+(.{3,60}?)(?:\.|;|,\s+(?:and|but)|$)",
            SimilarTo,
            Comparative,
            0.70,
            false,
        ),
        entry(
            r"(?i)(.{3,60}?)\s+(?:similar\s+to|comparable\s+to|resembles?)\s+(.{3,60}?)(?:\.|;|,\s+(?:and|but)|$)",
            SimilarTo,
            Comparative,
            0.75,
            false,
        ),
        entry(
            r"(?i)(.{3,60}?)\s+(?:unlike|different\s+from|contrary\s+to|opposed\s+to)\s+(.{3,60}?)(?:\.|;|,\s+(?:and|but)|$)",
            Contradicts,
            Comparative,
            0.70,
            false,
        ),
        // Vietnamese: "X giống như Y" → SIMILAR_TO
        entry(
            r"(?i)(.{3,60}?)\s+(?:giống\s+như|tương\s+tự|giống)\s+(.{3,60}?)(?:\.|;|$)",
            SimilarTo,
            Comparative,
            0.75,
            false,
        ),
        // Vietnamese comparative ("hơn" = than)
        entry(
            r"(?i)(.{3,60}?)\s+\w+\s+hơn\s+(.{3,60}?)(?:\.|;|$)",
            SimilarTo,
            Comparative,
            0.65,
            false,
        ),
        // Vietnamese: "X khác với Y" → CONTRADICTS
        entry(
            r"(?i)(.{3,60}?)\s+(?:khác\s+với|trái\s+ngược\s+với|ngược\s+lại\s+với)\s+(.{3,60}?)(?:\.|;|$)",
            Contradicts,
            Comparative,
            0.70,
            false,
        ),
    ]
});

static SEQUENTIAL: Lazy<Vec<PatternEntry>> = Lazy::new(|| {
    use RelationFamily::Sequential;
    use SynapseType::Before;
    vec![
        // "X then Y" → X BEFORE Y
        entry(
            r"(?i)(.{5,80}?)\s+(?:and\s+)?then\s+(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.70,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+afterwards?\s+(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.70,
            false,
        ),
        // "after X, Y" → X came first
        entry(
            r"(?i)after\s+(.{5,80}?)\s*[,;]\s*(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.75,
            false,
        ),
        // "before X, Y" → Y came first
        entry(
            r"(?i)before\s+(.{5,80}?)\s*[,;]\s*(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.75,
            true,
        ),
        entry(
            r"(?i)first\s+(.{5,80}?)\s*[,;]?\s*then\s+(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.85,
            false,
        ),
        entry(
            r"(?i)(.{5,80}?)\s+followed\s+by\s+(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.80,
            false,
        ),
        // Vietnamese: "trước khi X, Y" → Y BEFORE X
        entry(
            r"(?i)trước\s+khi\s+(.{5,80}?)\s*[,;]\s*(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.75,
            true,
        ),
        // Vietnamese: "sau khi X, Y" → X BEFORE Y
        entry(
            r"(?i)sau\s+khi\s+(.{5,80}?)\s*[,;]\s*(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.75,
            false,
        ),
        // Vietnamese: "X rồi Y" / "X sau đó Y"
        entry(
            r"(?i)(.{5,80}?)\s+(?:rồi|sau\s+đó)\s+(.{5,80}?)(?:\.|;|$)",
            Before,
            Sequential,
            0.70,
            false,
        ),
    ]
});

/// Extract relation candidates from text, deduplicated by
/// `(source, target, type)` keeping the highest confidence.
///
/// Never fails: short or pathological input yields an empty list.
pub fn extract_relations(text: &str) -> Vec<RelationCandidate> {
    if text.len() < 10 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for family in [&*CAUSAL, &*COMPARATIVE, &*SEQUENTIAL] {
        for pattern in family {
            for cap in pattern.regex.captures_iter(text) {
                let (g1, g2) = match (cap.get(1), cap.get(2)) {
                    (Some(a), Some(b)) => (a.as_str().trim(), b.as_str().trim()),
                    _ => continue,
                };
                let (source, target) = if pattern.reversed { (g2, g1) } else { (g1, g2) };
                if source.len() < 3 || target.len() < 3 {
                    continue;
                }
                candidates.push(RelationCandidate {
                    source_span: source.to_string(),
                    target_span: target.to_string(),
                    family: pattern.family,
                    synapse_type: pattern.synapse_type,
                    confidence: pattern.confidence,
                });
            }
        }
    }

    deduplicate(candidates)
}

fn deduplicate(candidates: Vec<RelationCandidate>) -> Vec<RelationCandidate> {
    let mut seen: std::collections::HashMap<String, RelationCandidate> =
        std::collections::HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for candidate in candidates {
        let key = format!(
            "{}:{}:{}",
            candidate.source_span.to_lowercase(),
            candidate.target_span.to_lowercase(),
            candidate.synapse_type.as_str()
        );
        match seen.get(&key) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            Some(_) => {
                seen.insert(key, candidate);
            }
            None => {
                order.push(key.clone());
                seen.insert(key, candidate);
            }
        }
    }

    order.into_iter().filter_map(|k| seen.remove(&k)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn because_maps_to_caused_by() {
        let rels = extract_relations("the deploy failed because the token expired.");
        assert!(!rels.is_empty());
        let r = &rels[0];
        assert_eq!(r.synapse_type, SynapseType::CausedBy);
        assert!(r.source_span.contains("deploy failed"));
        assert!(r.target_span.contains("token expired"));
    }

    #[test]
    fn leads_to_has_high_confidence() {
        let rels = extract_relations("caching the index leads to faster queries.");
        let r = rels
            .iter()
            .find(|r| r.synapse_type == SynapseType::LeadsTo)
            .unwrap();
        assert!(r.confidence >= 0.85);
    }

    #[test]
    fn before_pattern_reverses_groups() {
        let rels = extract_relations("before the launch meeting, we froze the schema.");
        let r = rels
            .iter()
            .find(|r| r.synapse_type == SynapseType::Before)
            .unwrap();
        // "before X, Y" means Y happened first.
        assert!(r.source_span.contains("froze the schema"));
        assert!(r.target_span.contains("launch meeting"));
    }

    #[test]
    fn unlike_maps_to_contradicts() {
        let rels = extract_relations("mongo is unlike postgres for this workload.");
        assert!(rels
            .iter()
            .any(|r| r.synapse_type == SynapseType::Contradicts));
    }

    #[test]
    fn vietnamese_causal_marker() {
        let rels = extract_relations("buổi họp bị hủy vì trời mưa lớn hôm nay.");
        assert!(rels.iter().any(|r| r.synapse_type == SynapseType::CausedBy));
    }

    #[test]
    fn duplicates_keep_highest_confidence() {
        let rels = extract_relations("the cache was slow due to lock contention.");
        let caused: Vec<_> = rels
            .iter()
            .filter(|r| r.synapse_type == SynapseType::CausedBy)
            .collect();
        assert_eq!(caused.len(), 1);
    }

    #[test]
    fn short_input_is_ignored() {
        assert!(extract_relations("so what").is_empty());
    }
}
