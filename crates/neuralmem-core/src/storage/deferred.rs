//! Deferred write batch.
//!
//! A retrieval never writes while it runs. Its Hebbian weight updates,
//! fiber conduction, co-activation events, and state changes are queued
//! here and applied in one transaction after the result is produced.
//! Dropping an unflushed batch (cancellation) leaves no trace.

use chrono::{DateTime, Utc};

use crate::core::{Maturation, NeuronState};

/// One queued synapse reinforcement.
#[derive(Debug, Clone)]
pub struct SynapseUpdate {
    pub synapse_id: String,
    /// Weight after the Hebbian update, already clamped to `[0, w_max]`.
    pub new_weight: f64,
}

/// All writes produced by one retrieval, applied atomically.
#[derive(Debug, Clone)]
pub struct DeferredBatch {
    /// Hebbian reinforcements for activated synapses.
    pub synapse_updates: Vec<SynapseUpdate>,
    /// Fibers traversed by reflex conduction.
    pub conductivity_bumps: Vec<String>,
    /// Co-activated neuron pairs in canonical order (`a < b`).
    pub co_activations: Vec<(String, String)>,
    /// Post-activation neuron states.
    pub state_updates: Vec<NeuronState>,
    /// Reinforced maturation records.
    pub maturation_updates: Vec<Maturation>,
    /// Timestamp stamped on every row the batch touches.
    pub applied_at: DateTime<Utc>,
}

impl DeferredBatch {
    pub fn new(applied_at: DateTime<Utc>) -> Self {
        Self {
            synapse_updates: Vec::new(),
            conductivity_bumps: Vec::new(),
            co_activations: Vec::new(),
            state_updates: Vec::new(),
            maturation_updates: Vec::new(),
            applied_at,
        }
    }

    /// Queue a co-activation pair, canonicalizing the order.
    pub fn push_co_activation(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let pair = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        if !self.co_activations.contains(&pair) {
            self.co_activations.push(pair);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.synapse_updates.is_empty()
            && self.conductivity_bumps.is_empty()
            && self.co_activations.is_empty()
            && self.state_updates.is_empty()
            && self.maturation_updates.is_empty()
    }
}
