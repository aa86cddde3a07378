//! Brain: container and tuning parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tuning parameters for one brain. Every knob has a sensible default;
/// callers usually only touch a few.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrainConfig {
    /// Base per-day decay rate for neuron activation.
    pub decay_rate: f64,
    /// Activation delta applied on direct reinforcement.
    pub reinforcement_delta: f64,
    /// Spreading stops below this activation.
    pub activation_threshold: f64,
    /// Hop ceiling for spreading activation.
    pub max_spread_hops: u32,
    /// Token budget for reconstructed context.
    pub max_context_tokens: usize,
    /// Base Hebbian learning rate η.
    pub learning_rate: f64,
    /// Max total outgoing synapse weight per neuron.
    pub weight_normalization_budget: f64,
    /// Novelty multiplier ceiling for fresh synapses.
    pub novelty_boost_max: f64,
    /// How fast novelty fades with reinforcement count.
    pub novelty_decay_rate: f64,
    /// Steepness of the activation sigmoid gate.
    pub sigmoid_steepness: f64,
    /// Default firing threshold for new neuron states.
    pub default_firing_threshold: f64,
    /// Default refractory window after firing, in milliseconds.
    pub default_refractory_ms: i64,
    /// Lateral inhibition keeps this many winners untouched.
    pub lateral_inhibition_k: usize,
    /// Losers are scaled by this factor.
    pub lateral_inhibition_factor: f64,
    /// Co-activation count needed before INFER creates a synapse.
    pub co_activation_threshold: u32,
    /// Co-activation events older than this many days are ignored.
    pub co_activation_window_days: i64,
    /// Upper bound on synapses created per INFER run.
    pub max_inferences_per_run: usize,
    /// Activation below this is eligible for pruning.
    pub prune_threshold: f64,
    /// Total activation budget enforced during stabilization.
    pub stabilization_budget: f64,
    /// Soft wall-clock limit for one retrieval, in milliseconds.
    pub retrieval_timeout_ms: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.1,
            reinforcement_delta: 0.05,
            activation_threshold: 0.2,
            max_spread_hops: 4,
            max_context_tokens: 1500,
            learning_rate: 0.1,
            weight_normalization_budget: 5.0,
            novelty_boost_max: 4.0,
            novelty_decay_rate: 0.2,
            sigmoid_steepness: 6.0,
            default_firing_threshold: 0.3,
            default_refractory_ms: 500,
            lateral_inhibition_k: 10,
            lateral_inhibition_factor: 0.7,
            co_activation_threshold: 3,
            co_activation_window_days: 7,
            max_inferences_per_run: 100,
            prune_threshold: 0.02,
            stabilization_budget: 10.0,
            retrieval_timeout_ms: 5_000,
        }
    }
}

/// A brain: an isolated memory graph with its own storage file and config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brain {
    pub id: String,
    pub name: String,
    pub config: BrainConfig,
    pub created_at: DateTime<Utc>,
}

impl Brain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            config: BrainConfig::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, config: BrainConfig) -> Self {
        self.config = config;
        self
    }
}
