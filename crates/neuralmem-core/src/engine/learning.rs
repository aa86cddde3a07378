//! Hebbian learning rule with saturation and novelty adaptation.
//!
//! Implements `Δw = η_eff · pre · post · (w_max - w)` where
//! `η_eff = η · (1 + novelty_boost · e^(-novelty_decay · r))`.
//!
//! New synapses learn fast and stabilize with reinforcement; the
//! `(w_max - w)` term saturates weights near the ceiling. Competitive
//! normalization caps total outgoing weight per neuron.

use crate::core::{BrainConfig, Synapse, W_MAX};

/// Parameters for the learning rule, lifted from a brain config.
#[derive(Debug, Clone, Copy)]
pub struct LearningConfig {
    pub learning_rate: f64,
    pub weight_max: f64,
    pub novelty_boost_max: f64,
    pub novelty_decay_rate: f64,
    pub weight_normalization_budget: f64,
}

impl From<&BrainConfig> for LearningConfig {
    fn from(config: &BrainConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            weight_max: W_MAX,
            novelty_boost_max: config.novelty_boost_max,
            novelty_decay_rate: config.novelty_decay_rate,
            weight_normalization_budget: config.weight_normalization_budget,
        }
    }
}

/// Result of one learning-rule computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightUpdate {
    pub new_weight: f64,
    pub delta: f64,
    pub effective_rate: f64,
    pub saturated: bool,
}

/// Novelty-adjusted learning rate. A fresh synapse (r = 0) learns about
/// `(1 + novelty_boost_max)`× faster than a long-reinforced one.
pub fn effective_rate(config: &LearningConfig, reinforced_count: u32) -> f64 {
    let novelty =
        1.0 + config.novelty_boost_max * (-config.novelty_decay_rate * reinforced_count as f64).exp();
    config.learning_rate * novelty
}

/// Hebbian update for one activated synapse.
///
/// Zero pre- or post-activation means no learning.
pub fn hebbian_update(
    config: &LearningConfig,
    current_weight: f64,
    pre_activation: f64,
    post_activation: f64,
    reinforced_count: u32,
) -> WeightUpdate {
    if pre_activation <= 0.0 || post_activation <= 0.0 {
        return WeightUpdate {
            new_weight: current_weight,
            delta: 0.0,
            effective_rate: 0.0,
            saturated: false,
        };
    }

    let rate = effective_rate(config, reinforced_count);
    let headroom = config.weight_max - current_weight;
    let delta = rate * pre_activation * post_activation * headroom;
    let new_weight = (current_weight + delta).clamp(0.0, config.weight_max);

    WeightUpdate {
        new_weight,
        delta: new_weight - current_weight,
        effective_rate: rate,
        saturated: headroom < 0.05,
    }
}

/// Anti-Hebbian reduction, used by conflict resolution and the disputed
/// path: `Δw = -η_eff · pre · post · w`.
pub fn anti_hebbian_update(
    config: &LearningConfig,
    current_weight: f64,
    pre_activation: f64,
    post_activation: f64,
    reinforced_count: u32,
) -> WeightUpdate {
    let rate = effective_rate(config, reinforced_count);
    let delta = -rate * pre_activation * post_activation * current_weight;
    let new_weight = (current_weight + delta).max(0.0);

    WeightUpdate {
        new_weight,
        delta: new_weight - current_weight,
        effective_rate: rate,
        saturated: false,
    }
}

/// Competitive normalization: if a neuron's total outgoing weight exceeds
/// the budget, scale its outgoing synapses proportionally back down.
/// Returns the ids and new weights of every synapse that changed.
pub fn normalize_outgoing(
    synapses: &[Synapse],
    source_id: &str,
    budget: f64,
) -> Vec<(String, f64)> {
    let outgoing: Vec<&Synapse> = synapses
        .iter()
        .filter(|s| s.source_id == source_id)
        .collect();
    if outgoing.is_empty() {
        return Vec::new();
    }

    let total: f64 = outgoing.iter().map(|s| s.weight).sum();
    if total <= budget {
        return Vec::new();
    }

    let scale = budget / total;
    outgoing
        .into_iter()
        .map(|s| (s.id.clone(), s.weight * scale))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SynapseType;

    fn config() -> LearningConfig {
        LearningConfig::from(&BrainConfig::default())
    }

    #[test]
    fn novel_synapse_learns_faster() {
        let c = config();
        let fresh = hebbian_update(&c, 0.3, 0.8, 0.8, 0);
        let seasoned = hebbian_update(&c, 0.3, 0.8, 0.8, 50);
        assert!(fresh.delta > seasoned.delta);
        // r = 0 gives the full (1 + novelty_boost_max) multiplier.
        assert!((fresh.effective_rate - c.learning_rate * (1.0 + c.novelty_boost_max)).abs() < 1e-9);
    }

    #[test]
    fn saturation_prevents_runaway_growth() {
        let c = config();
        let mut w = 0.2;
        for _ in 0..10_000 {
            w = hebbian_update(&c, w, 1.0, 1.0, 0).new_weight;
        }
        assert!(w <= W_MAX);
        let near_ceiling = hebbian_update(&c, 0.999, 1.0, 1.0, 0);
        assert!(near_ceiling.saturated);
        assert!(near_ceiling.delta < 0.001);
    }

    #[test]
    fn zero_activation_means_no_learning() {
        let c = config();
        let update = hebbian_update(&c, 0.5, 0.0, 0.9, 0);
        assert_eq!(update.delta, 0.0);
        assert_eq!(update.new_weight, 0.5);
    }

    #[test]
    fn anti_hebbian_shrinks_toward_zero() {
        let c = config();
        let update = anti_hebbian_update(&c, 0.5, 1.0, 1.0, 0);
        assert!(update.new_weight < 0.5);
        assert!(update.new_weight >= 0.0);
    }

    #[test]
    fn normalization_scales_back_to_budget() {
        let c = config();
        let synapses: Vec<Synapse> = (0..8)
            .map(|i| Synapse::new("pre", format!("post{i}"), SynapseType::CoOccurs, 0.9))
            .collect();
        let scaled = normalize_outgoing(&synapses, "pre", c.weight_normalization_budget);
        assert_eq!(scaled.len(), 8);
        let total: f64 = scaled.iter().map(|(_, w)| w).sum();
        assert!((total - c.weight_normalization_budget).abs() < 1e-9);
    }

    #[test]
    fn normalization_leaves_within_budget_untouched() {
        let synapses = vec![Synapse::new("pre", "post", SynapseType::CoOccurs, 0.5)];
        assert!(normalize_outgoing(&synapses, "pre", 5.0).is_empty());
    }
}
