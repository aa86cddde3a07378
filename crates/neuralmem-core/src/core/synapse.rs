//! Synapse: typed, weighted edge between neurons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

/// Hard ceiling on synapse weight.
pub const W_MAX: f64 = 1.0;

// ============================================================================
// SYNAPSE TYPES
// ============================================================================

/// Relationship carried by a synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynapseType {
    // temporal
    HappenedAt,
    Before,
    After,
    During,
    // spatial
    AtLocation,
    Contains,
    Near,
    // causal
    CausedBy,
    LeadsTo,
    Enables,
    Prevents,
    // associative
    CoOccurs,
    RelatedTo,
    SimilarTo,
    Contradicts,
    // structural
    IsA,
    HasProperty,
    Involves,
    PartOf,
    DependsOn,
    // agency
    Performs,
    Suggested,
    Uses,
    Requires,
    // emotional
    Felt,
    Evokes,
    Desires,
    Avoids,
    // bookkeeping
    Supersedes,
}

impl SynapseType {
    /// String name used in storage and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            SynapseType::HappenedAt => "happened_at",
            SynapseType::Before => "before",
            SynapseType::After => "after",
            SynapseType::During => "during",
            SynapseType::AtLocation => "at_location",
            SynapseType::Contains => "contains",
            SynapseType::Near => "near",
            SynapseType::CausedBy => "caused_by",
            SynapseType::LeadsTo => "leads_to",
            SynapseType::Enables => "enables",
            SynapseType::Prevents => "prevents",
            SynapseType::CoOccurs => "co_occurs",
            SynapseType::RelatedTo => "related_to",
            SynapseType::SimilarTo => "similar_to",
            SynapseType::Contradicts => "contradicts",
            SynapseType::IsA => "is_a",
            SynapseType::HasProperty => "has_property",
            SynapseType::Involves => "involves",
            SynapseType::PartOf => "part_of",
            SynapseType::DependsOn => "depends_on",
            SynapseType::Performs => "performs",
            SynapseType::Suggested => "suggested",
            SynapseType::Uses => "uses",
            SynapseType::Requires => "requires",
            SynapseType::Felt => "felt",
            SynapseType::Evokes => "evokes",
            SynapseType::Desires => "desires",
            SynapseType::Avoids => "avoids",
            SynapseType::Supersedes => "supersedes",
        }
    }

    /// Parse from a stored name. Unknown names fall back to `RelatedTo`.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "happened_at" => SynapseType::HappenedAt,
            "before" => SynapseType::Before,
            "after" => SynapseType::After,
            "during" => SynapseType::During,
            "at_location" => SynapseType::AtLocation,
            "contains" => SynapseType::Contains,
            "near" => SynapseType::Near,
            "caused_by" => SynapseType::CausedBy,
            "leads_to" => SynapseType::LeadsTo,
            "enables" => SynapseType::Enables,
            "prevents" => SynapseType::Prevents,
            "co_occurs" => SynapseType::CoOccurs,
            "related_to" => SynapseType::RelatedTo,
            "similar_to" => SynapseType::SimilarTo,
            "contradicts" => SynapseType::Contradicts,
            "is_a" => SynapseType::IsA,
            "has_property" => SynapseType::HasProperty,
            "involves" => SynapseType::Involves,
            "part_of" => SynapseType::PartOf,
            "depends_on" => SynapseType::DependsOn,
            "performs" => SynapseType::Performs,
            "suggested" => SynapseType::Suggested,
            "uses" => SynapseType::Uses,
            "requires" => SynapseType::Requires,
            "felt" => SynapseType::Felt,
            "evokes" => SynapseType::Evokes,
            "desires" => SynapseType::Desires,
            "avoids" => SynapseType::Avoids,
            "supersedes" => SynapseType::Supersedes,
            _ => SynapseType::RelatedTo,
        }
    }
}

impl std::fmt::Display for SynapseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Edge directionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Signal conducts source → target only.
    #[default]
    Uni,
    /// Signal conducts both ways.
    Bi,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Uni => "uni",
            Direction::Bi => "bi",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bi" => Direction::Bi,
            _ => Direction::Uni,
        }
    }
}

// ============================================================================
// SYNAPSE
// ============================================================================

/// A typed weighted edge owned by the brain, referring to neurons by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synapse {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub synapse_type: SynapseType,
    /// Connection strength, always within `[0, w_max]`.
    pub weight: f64,
    #[serde(default)]
    pub direction: Direction,
    /// May carry `_inferred` and `_superseded` markers.
    #[serde(default)]
    pub metadata: Metadata,
    /// Monotonically non-decreasing reinforcement counter.
    pub reinforced_count: u32,
    pub last_activated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Synapse {
    /// Create a new synapse with a fresh id. Weight is clamped to `[0, w_max]`.
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        synapse_type: SynapseType,
        weight: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            synapse_type,
            weight: weight.clamp(0.0, W_MAX),
            direction: Direction::Uni,
            metadata: Metadata::new(),
            reinforced_count: 0,
            last_activated: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: bidirectional edge.
    pub fn bidirectional(mut self) -> Self {
        self.direction = Direction::Bi;
        self
    }

    /// Builder: metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builder: mark as machine-inferred (decays faster until reinforced).
    pub fn inferred(self) -> Self {
        self.with_metadata("_inferred", serde_json::Value::Bool(true))
    }

    /// Whether this synapse was created by consolidation rather than encoding.
    #[inline]
    pub fn is_inferred(&self) -> bool {
        self.metadata
            .get("_inferred")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Apply a reinforcement: new weight (clamped, never above `w_max`),
    /// bumped counter, forward-only `last_activated`.
    pub fn reinforce(&mut self, new_weight: f64, now: DateTime<Utc>) {
        self.weight = new_weight.clamp(0.0, W_MAX);
        self.reinforced_count = self.reinforced_count.saturating_add(1);
        if self.last_activated.map(|t| now > t).unwrap_or(true) {
            self.last_activated = Some(now);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
