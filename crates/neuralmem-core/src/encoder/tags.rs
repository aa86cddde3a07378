//! Tag normalization.
//!
//! Raw tags pass through a synonym table and a SimHash near-match against
//! the tags already in the brain, so "auth", "authn", and "authentication"
//! collapse onto one canonical tag instead of fragmenting recall.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;

use crate::extraction::{is_near_duplicate, simhash64};

/// Common shorthand → canonical form.
static SYNONYMS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("authn", "authentication"),
        ("auth", "authentication"),
        ("db", "database"),
        ("postgres", "postgresql"),
        ("k8s", "kubernetes"),
        ("js", "javascript"),
        ("ts", "typescript"),
        ("py", "python"),
        ("config", "configuration"),
        ("repo", "repository"),
        ("docs", "documentation"),
        ("infra", "infrastructure"),
        ("perf", "performance"),
        ("deps", "dependencies"),
        ("env", "environment"),
    ]
    .into_iter()
    .collect()
});

/// Normalize one raw tag against the brain's existing tags.
pub fn normalize_tag(raw: &str, existing: &BTreeSet<String>) -> Option<String> {
    let cleaned = raw.trim().to_lowercase().replace([' ', '_'], "-");
    if cleaned.is_empty() {
        return None;
    }
    let canonical = SYNONYMS.get(cleaned.as_str()).map_or(cleaned, |s| s.to_string());

    if existing.contains(&canonical) {
        return Some(canonical);
    }

    // Near-match an existing tag before minting a new one.
    let hash = simhash64(&canonical);
    if hash != 0 {
        for tag in existing {
            let tag_hash = simhash64(tag);
            if tag_hash != 0 && is_near_duplicate(hash, tag_hash) {
                return Some(tag.clone());
            }
        }
    }

    Some(canonical)
}

/// Normalize a set of raw tags, deduplicating after canonicalization.
pub fn normalize_tags<'a>(
    raw: impl IntoIterator<Item = &'a String>,
    existing: &BTreeSet<String>,
) -> BTreeSet<String> {
    raw.into_iter()
        .filter_map(|t| normalize_tag(t, existing))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonyms_collapse() {
        let existing = BTreeSet::new();
        assert_eq!(
            normalize_tag("auth", &existing).as_deref(),
            Some("authentication")
        );
        assert_eq!(normalize_tag("DB", &existing).as_deref(), Some("database"));
    }

    #[test]
    fn near_matches_reuse_existing_tags() {
        let existing: BTreeSet<String> = ["retry-loop-handling".to_string()].into();
        // One short token differs; the SimHash near-match folds it in.
        let normalized = normalize_tag("retry-loop handling", &existing);
        assert_eq!(normalized.as_deref(), Some("retry-loop-handling"));
    }

    #[test]
    fn empty_and_whitespace_tags_are_dropped() {
        let existing = BTreeSet::new();
        assert_eq!(normalize_tag("  ", &existing), None);
    }

    #[test]
    fn sets_deduplicate_after_normalization() {
        let existing = BTreeSet::new();
        let raw = vec!["auth".to_string(), "authentication".to_string()];
        let tags = normalize_tags(&raw, &existing);
        assert_eq!(tags.len(), 1);
    }
}
