//! Fiber: a coherent memory cluster.
//!
//! A fiber bundles the neurons and synapses of one remembered episode and
//! carries an ordered `pathway` along which reflex activation conducts.
//! Fibers hold non-owning id references; the brain owns the entities.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

/// Conductivity gained each time a fiber is traversed during retrieval.
pub const CONDUCTION_BUMP: f64 = 0.02;

/// A memory cluster: neurons + synapses + an ordered conduction pathway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fiber {
    pub id: String,
    /// Member neurons (non-owning references).
    pub neuron_ids: BTreeSet<String>,
    /// Member synapses (non-owning references).
    pub synapse_ids: BTreeSet<String>,
    /// Primary entry point; always a member of `neuron_ids`.
    pub anchor_neuron_id: String,
    /// Ordered conduction sequence; a subset of `neuron_ids`.
    pub pathway: Vec<String>,
    /// How well this fiber conducts, within `[0, 1]`. Rises with use.
    pub conductivity: f64,
    /// Last time reflex activation traversed this fiber.
    pub last_conducted: Option<DateTime<Utc>>,
    /// Compressed text of the memory.
    pub summary: String,
    /// Importance, within `[0, 1]`.
    pub salience: f64,
    /// Tags produced by extraction.
    pub auto_tags: BTreeSet<String>,
    /// Tags supplied by the calling agent.
    pub agent_tags: BTreeSet<String>,
    /// Access counter.
    pub frequency: u32,
    /// Validity window start.
    pub time_start: Option<DateTime<Utc>>,
    /// Validity window end.
    pub time_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Fiber {
    /// Create a fiber, validating that the anchor and every pathway entry
    /// belong to `neuron_ids`.
    pub fn create(
        neuron_ids: BTreeSet<String>,
        synapse_ids: BTreeSet<String>,
        anchor_neuron_id: String,
        pathway: Vec<String>,
        summary: String,
    ) -> Result<Self, String> {
        if !neuron_ids.contains(&anchor_neuron_id) {
            return Err(format!(
                "anchor neuron {anchor_neuron_id} must be a fiber member"
            ));
        }
        if let Some(stray) = pathway.iter().find(|id| !neuron_ids.contains(*id)) {
            return Err(format!("pathway neuron {stray} is not a fiber member"));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            neuron_ids,
            synapse_ids,
            anchor_neuron_id,
            pathway,
            conductivity: 1.0,
            last_conducted: None,
            summary,
            salience: 0.5,
            auto_tags: BTreeSet::new(),
            agent_tags: BTreeSet::new(),
            frequency: 0,
            time_start: None,
            time_end: None,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        })
    }

    /// All tags: extraction-derived plus agent-supplied.
    pub fn tags(&self) -> BTreeSet<String> {
        self.auto_tags.union(&self.agent_tags).cloned().collect()
    }

    /// Position of a neuron in the conduction pathway.
    pub fn pathway_position(&self, neuron_id: &str) -> Option<usize> {
        self.pathway.iter().position(|id| id == neuron_id)
    }

    /// Whether a neuron sits on the conduction pathway.
    #[inline]
    pub fn is_in_pathway(&self, neuron_id: &str) -> bool {
        self.pathway.iter().any(|id| id == neuron_id)
    }

    #[inline]
    pub fn contains_neuron(&self, neuron_id: &str) -> bool {
        self.neuron_ids.contains(neuron_id)
    }

    /// Record a traversal: bump conductivity (capped at 1.0), stamp
    /// `last_conducted`, count the access.
    pub fn conduct(&mut self, now: DateTime<Utc>) {
        self.conductivity = (self.conductivity + CONDUCTION_BUMP).min(1.0);
        self.last_conducted = Some(now);
        self.frequency = self.frequency.saturating_add(1);
    }

    /// Whether the validity window contains `at`. Open bounds always match.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.time_start.map(|t| at >= t).unwrap_or(true);
        let before_end = self.time_end.map(|t| at <= t).unwrap_or(true);
        after_start && before_end
    }

    /// Tag-set Jaccard similarity with another fiber.
    pub fn tag_jaccard(&self, other: &Fiber) -> f64 {
        let a = self.tags();
        let b = other.tags();
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        let inter = a.intersection(&b).count() as f64;
        let union = a.union(&b).count() as f64;
        inter / union
    }

    /// Time factor for trail conduction: linear one-week decay with a 0.1
    /// floor, `max(0.1, 1 - age_hours/168)`. Unknown history conducts at 0.5.
    pub fn time_factor(&self, reference: DateTime<Utc>) -> f64 {
        match self.last_conducted {
            None => 0.5,
            Some(last) => {
                let age_hours = (reference - last).num_seconds() as f64 / 3600.0;
                (1.0 - age_hours / 168.0).max(0.1)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber(ids: &[&str]) -> Fiber {
        let neuron_ids: BTreeSet<String> = ids.iter().map(|s| s.to_string()).collect();
        let pathway: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        Fiber::create(
            neuron_ids,
            BTreeSet::new(),
            ids[0].to_string(),
            pathway,
            "test".into(),
        )
        .unwrap()
    }

    #[test]
    fn create_rejects_anchor_outside_members() {
        let err = Fiber::create(
            BTreeSet::from(["a".to_string()]),
            BTreeSet::new(),
            "b".to_string(),
            vec![],
            String::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn create_rejects_pathway_outside_members() {
        let err = Fiber::create(
            BTreeSet::from(["a".to_string()]),
            BTreeSet::new(),
            "a".to_string(),
            vec!["a".to_string(), "z".to_string()],
            String::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn conduct_bumps_and_caps_conductivity() {
        let now = Utc::now();
        let mut f = fiber(&["a", "b"]);
        f.conductivity = 0.99;
        f.conduct(now);
        assert_eq!(f.conductivity, 1.0);
        assert_eq!(f.frequency, 1);
        assert_eq!(f.last_conducted, Some(now));
    }

    #[test]
    fn tags_are_union_of_auto_and_agent() {
        let mut f = fiber(&["a"]);
        f.auto_tags.insert("auth".into());
        f.agent_tags.insert("auth".into());
        f.agent_tags.insert("backend".into());
        assert_eq!(f.tags().len(), 2);
    }

    #[test]
    fn time_factor_floors_at_tenth() {
        let now = Utc::now();
        let mut f = fiber(&["a"]);
        assert_eq!(f.time_factor(now), 0.5);

        f.last_conducted = Some(now - chrono::Duration::hours(1));
        assert!(f.time_factor(now) > 0.99);

        f.last_conducted = Some(now - chrono::Duration::days(30));
        assert_eq!(f.time_factor(now), 0.1);
    }

    #[test]
    fn validity_window_with_open_bounds() {
        let now = Utc::now();
        let mut f = fiber(&["a"]);
        assert!(f.is_valid_at(now));
        f.time_end = Some(now - chrono::Duration::days(1));
        assert!(!f.is_valid_at(now));
    }
}
