//! Neuron: the atomic unit of memory.
//!
//! A neuron is immutable identity: type, content, metadata. The mutable
//! activation and lifecycle data lives in [`NeuronState`], one per neuron,
//! so activation updates never touch the identity row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

// ============================================================================
// NEURON TYPES
// ============================================================================

/// Category of information a neuron represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeuronType {
    /// Temporal markers: "3pm", "yesterday"
    Time,
    /// Locations: "coffee shop", "office"
    Spatial,
    /// Named entities: "Alice", "FastAPI"
    Entity,
    /// Verbs and actions: "discussed", "deployed"
    Action,
    /// Emotional or mental states: "happy", "frustrated"
    State,
    /// Abstract ideas: "API design", "authentication"
    Concept,
    /// Sensory experiences: "loud", "bright"
    Sensory,
    /// Goals and intentions: "learn", "ship"
    Intent,
}

impl NeuronType {
    /// String name used in storage and snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            NeuronType::Time => "time",
            NeuronType::Spatial => "spatial",
            NeuronType::Entity => "entity",
            NeuronType::Action => "action",
            NeuronType::State => "state",
            NeuronType::Concept => "concept",
            NeuronType::Sensory => "sensory",
            NeuronType::Intent => "intent",
        }
    }

    /// Parse from a stored name. Unknown names fall back to `Concept`.
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "time" => NeuronType::Time,
            "spatial" => NeuronType::Spatial,
            "entity" => NeuronType::Entity,
            "action" => NeuronType::Action,
            "state" => NeuronType::State,
            "concept" => NeuronType::Concept,
            "sensory" => NeuronType::Sensory,
            "intent" => NeuronType::Intent,
            _ => NeuronType::Concept,
        }
    }

    /// Seed weight when a neuron of this type anchors a query.
    /// Temporal anchors dominate, then entities, actions, concepts.
    #[inline]
    pub fn anchor_weight(&self) -> f64 {
        match self {
            NeuronType::Time => 1.0,
            NeuronType::Entity => 0.8,
            NeuronType::Action => 0.6,
            NeuronType::Concept => 0.4,
            _ => 0.5,
        }
    }

    /// Position of this type in the deterministic pathway ordering
    /// (time → space → entity → action → concept → the rest).
    #[inline]
    pub fn pathway_rank(&self) -> u8 {
        match self {
            NeuronType::Time => 0,
            NeuronType::Spatial => 1,
            NeuronType::Entity => 2,
            NeuronType::Action => 3,
            NeuronType::Concept => 4,
            NeuronType::Intent => 5,
            NeuronType::State => 6,
            NeuronType::Sensory => 7,
        }
    }
}

impl std::fmt::Display for NeuronType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// NEURON
// ============================================================================

/// Immutable memory unit.
///
/// Two neurons with equal `(type, canonical content)` share an id within a
/// brain; the encoder enforces that by lookup-before-create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neuron {
    /// Stable unique identifier (UUID v4).
    pub id: String,
    /// Category of information.
    #[serde(rename = "type")]
    pub neuron_type: NeuronType,
    /// Raw text value of this memory unit.
    pub content: String,
    /// Type-specific extra information, plus engine markers
    /// (`_disputed`, `_superseded`, `_emotion`).
    #[serde(default)]
    pub metadata: Metadata,
    /// 64-bit SimHash of the originating content, for near-duplicate lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Neuron {
    /// Create a neuron with a fresh id.
    pub fn new(neuron_type: NeuronType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            neuron_type,
            content: content.into(),
            metadata: Metadata::new(),
            content_hash: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a content hash (builder style).
    pub fn with_content_hash(mut self, hash: u64) -> Self {
        self.content_hash = Some(hash);
        self
    }

    /// Attach a metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Canonical form used for identity lookups: trimmed, lowercased.
    pub fn canonical_content(&self) -> String {
        canonicalize(&self.content)
    }

    fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this neuron is part of an unresolved contradiction.
    /// Disputed neurons score at half strength during retrieval.
    #[inline]
    pub fn is_disputed(&self) -> bool {
        self.flag("_disputed")
    }

    /// Whether this neuron was replaced by a newer contradicting memory.
    /// Superseded neurons score at quarter strength during retrieval.
    #[inline]
    pub fn is_superseded(&self) -> bool {
        self.flag("_superseded")
    }

    /// Retrieval score multiplier from dispute markers.
    pub fn dispute_penalty(&self) -> f64 {
        if self.is_superseded() {
            0.25
        } else if self.is_disputed() {
            0.5
        } else {
            1.0
        }
    }
}

/// Canonicalize content for `(type, content)` identity: trim + lowercase.
pub fn canonicalize(content: &str) -> String {
    content.trim().to_lowercase()
}

// ============================================================================
// NEURON STATE
// ============================================================================

/// Mutable activation and lifecycle state, one per neuron.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuronState {
    /// The neuron this state belongs to.
    pub neuron_id: String,
    /// Current activation, always within `[0, 1]`.
    pub activation_level: f64,
    /// How many times this neuron has been activated.
    pub access_frequency: u32,
    /// Last activation timestamp. Never moves backward.
    pub last_activated: Option<DateTime<Utc>>,
    /// Per-day exponential decay rate (type-specific default).
    pub decay_rate: f64,
    /// Activation must cross this to count as firing.
    pub firing_threshold: f64,
    /// While set and in the future, this neuron is skipped during spreading.
    pub refractory_until: Option<DateTime<Utc>>,
    /// Length of the refractory window after firing.
    pub refractory_period_ms: i64,
    /// Reserved for homeostatic regulation.
    pub homeostatic_target: f64,
    /// When this state row was created.
    pub created_at: DateTime<Utc>,
}

impl NeuronState {
    /// Fresh state for a neuron with a type-appropriate decay rate.
    pub fn new(neuron_id: impl Into<String>, decay_rate: f64) -> Self {
        Self {
            neuron_id: neuron_id.into(),
            activation_level: 0.0,
            access_frequency: 0,
            last_activated: None,
            decay_rate,
            firing_threshold: 0.3,
            refractory_until: None,
            refractory_period_ms: 500,
            homeostatic_target: 0.5,
            created_at: Utc::now(),
        }
    }

    /// Whether the neuron is inside its refractory window at `now`.
    #[inline]
    pub fn in_refractory(&self, now: DateTime<Utc>) -> bool {
        self.refractory_until.map(|t| t > now).unwrap_or(false)
    }

    /// Apply an activation event. The raw level is passed through the
    /// sigmoid gate; crossing the firing threshold opens a refractory window.
    pub fn activate(&mut self, raw: f64, steepness: f64, now: DateTime<Utc>) {
        let gated = sigmoid(raw, steepness);
        self.activation_level = gated;
        self.access_frequency = self.access_frequency.saturating_add(1);
        if self.last_activated.map(|t| now > t).unwrap_or(true) {
            self.last_activated = Some(now);
        }
        if gated >= self.firing_threshold {
            self.refractory_until =
                Some(now + chrono::Duration::milliseconds(self.refractory_period_ms));
        }
    }

    /// Set the activation level directly (reinforcement path: no gating).
    pub fn reinforce(&mut self, level: f64, now: DateTime<Utc>) {
        self.activation_level = level.clamp(0.0, 1.0);
        self.access_frequency = self.access_frequency.saturating_add(1);
        if self.last_activated.map(|t| now > t).unwrap_or(true) {
            self.last_activated = Some(now);
        }
    }

    /// Exponential decay over elapsed days: `a' = a * e^(-rate * days)`.
    pub fn decay(&mut self, days_elapsed: f64, rate_multiplier: f64) {
        if days_elapsed <= 0.0 {
            return;
        }
        let factor = (-self.decay_rate * rate_multiplier * days_elapsed).exp();
        self.activation_level = (self.activation_level * factor).clamp(0.0, 1.0);
    }
}

/// Sigmoid gate applied to every activation assignment:
/// `a = 1 / (1 + e^(-s * (r - 0.5)))`.
#[inline]
pub fn sigmoid(raw: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (raw - 0.5)).exp())
}

// ============================================================================
// TESTS
// ============================================================================
