//! Decay manager.
//!
//! Applies exponential forgetting to neuron activation on a cadence. The
//! per-neuron decay rate (type-aware) is scaled by the maturation stage of
//! the most mature fiber holding the neuron, and modulated by strong
//! emotion: intense negative memories persist longest. Inferred synapses
//! that never earned reinforcement decay at double rate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{BrainConfig, MaturationStage};
use crate::storage::{Result, SqliteStore};

/// Batch size for paged scans.
const PAGE: u64 = 500;

/// Report of one decay run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    pub states_processed: usize,
    pub states_decayed: usize,
    /// Neurons whose activation fell below the prune threshold.
    pub prune_eligible: usize,
    pub synapses_decayed: usize,
    pub dry_run: bool,
}

/// Runs type- and stage-aware decay over the whole brain.
pub struct DecayManager<'a> {
    store: &'a SqliteStore,
    config: &'a BrainConfig,
}

impl<'a> DecayManager<'a> {
    pub fn new(store: &'a SqliteStore, config: &'a BrainConfig) -> Self {
        Self { store, config }
    }

    /// Apply decay as of `now`. With `dry_run` nothing is written.
    pub fn run(&self, now: DateTime<Utc>, dry_run: bool) -> Result<DecayReport> {
        let (stage_of, emotion_of) = self.fiber_modifiers()?;
        // Elapsed time is measured from the later of the neuron's last
        // activation and the previous committed decay run, so repeated runs
        // never double-decay.
        let last_run = self.store.last_consolidation_of("decay")?;

        let mut report = DecayReport {
            states_processed: 0,
            states_decayed: 0,
            prune_eligible: 0,
            synapses_decayed: 0,
            dry_run,
        };

        let mut offset = 0u64;
        loop {
            let mut page = self.store.all_states(offset, PAGE)?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u64;

            let mut changed = Vec::new();
            for state in page.iter_mut() {
                report.states_processed += 1;

                let reference = state
                    .last_activated
                    .unwrap_or(state.created_at)
                    .max(last_run.unwrap_or(state.created_at));
                let days = (now - reference).num_seconds() as f64 / 86_400.0;
                if days <= 0.0 || state.activation_level <= 0.0 {
                    continue;
                }

                let stage_multiplier = stage_of
                    .get(&state.neuron_id)
                    .map(|s| s.decay_multiplier())
                    .unwrap_or(1.0);
                let emotion_multiplier =
                    emotion_of.get(&state.neuron_id).copied().unwrap_or(1.0);

                let before = state.activation_level;
                state.decay(days, stage_multiplier * emotion_multiplier);
                if state.activation_level < before {
                    report.states_decayed += 1;
                    changed.push(state.clone());
                }
                if state.activation_level < self.config.prune_threshold {
                    report.prune_eligible += 1;
                }
            }

            if !dry_run && !changed.is_empty() {
                self.store.upsert_states(&changed)?;
            }
        }

        report.synapses_decayed = self.decay_inferred_synapses(now, last_run, dry_run)?;

        if !dry_run {
            self.store.record_consolidation(
                "decay",
                false,
                0,
                report.states_processed as u64,
                report.states_decayed as u64,
                &[],
            )?;
        }
        tracing::info!(
            processed = report.states_processed,
            decayed = report.states_decayed,
            prune_eligible = report.prune_eligible,
            dry_run,
            "decay run complete"
        );
        Ok(report)
    }

    /// Per-neuron stage (most mature fiber wins) and emotional modulation.
    fn fiber_modifiers(
        &self,
    ) -> Result<(HashMap<String, MaturationStage>, HashMap<String, f64>)> {
        let mut stage_of: HashMap<String, MaturationStage> = HashMap::new();
        let mut emotion_of: HashMap<String, f64> = HashMap::new();

        let mut offset = 0u64;
        loop {
            let fibers = self.store.all_fibers(offset, PAGE)?;
            if fibers.is_empty() {
                break;
            }
            offset += fibers.len() as u64;

            for fiber in &fibers {
                let stage = self
                    .store
                    .get_maturation(&fiber.id)?
                    .map(|m| m.stage)
                    .unwrap_or(MaturationStage::Stm);

                let emotion = emotional_multiplier(fiber);

                for neuron_id in &fiber.neuron_ids {
                    stage_of
                        .entry(neuron_id.clone())
                        .and_modify(|s| {
                            if stage.decay_multiplier() < s.decay_multiplier() {
                                *s = stage;
                            }
                        })
                        .or_insert(stage);
                    if emotion < 1.0 {
                        let entry = emotion_of.entry(neuron_id.clone()).or_insert(1.0);
                        *entry = entry.min(emotion);
                    }
                }
            }
        }
        Ok((stage_of, emotion_of))
    }

    /// Inferred synapses with fewer than two reinforcements decay at twice
    /// the brain rate; dream links carry their own multiplier on top.
    fn decay_inferred_synapses(
        &self,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
        dry_run: bool,
    ) -> Result<usize> {
        let mut decayed = 0usize;
        let mut offset = 0u64;
        loop {
            let synapses = self.store.all_synapses(offset, PAGE)?;
            if synapses.is_empty() {
                break;
            }
            offset += synapses.len() as u64;

            for synapse in &synapses {
                if !synapse.is_inferred() || synapse.reinforced_count >= 2 {
                    continue;
                }
                let reference = synapse
                    .last_activated
                    .unwrap_or(synapse.created_at)
                    .max(last_run.unwrap_or(synapse.created_at));
                let days = (now - reference).num_seconds() as f64 / 86_400.0;
                if days <= 0.0 {
                    continue;
                }
                let extra = synapse
                    .metadata
                    .get("_decay_multiplier")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(1.0);
                let factor = (-2.0 * self.config.decay_rate * extra * days).exp();
                let new_weight = synapse.weight * factor;
                if new_weight < synapse.weight {
                    decayed += 1;
                    if !dry_run {
                        self.store.update_synapse(
                            &synapse.id,
                            new_weight,
                            synapse.reinforced_count,
                            synapse.last_activated,
                        )?;
                    }
                }
            }
        }
        Ok(decayed)
    }
}

/// Emotional decay modulation from fiber metadata: intense negative ×0.7,
/// intense positive ×0.9.
fn emotional_multiplier(fiber: &crate::core::Fiber) -> f64 {
    let intensity = fiber
        .metadata
        .get("_emotion_intensity")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(0.0);
    if intensity < 0.7 {
        return 1.0;
    }
    match fiber
        .metadata
        .get("_emotion_valence")
        .and_then(serde_json::Value::as_str)
    {
        Some("negative") => 0.7,
        Some("positive") => 0.9,
        _ => 1.0,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Neuron, NeuronState, NeuronType};
    use chrono::Duration;

    fn seed_state(store: &SqliteStore, decay_rate: f64, created: DateTime<Utc>) -> String {
        let mut neuron = Neuron::new(NeuronType::Concept, format!("n-{decay_rate}"));
        neuron.created_at = created;
        store.add_neuron(&neuron).unwrap();
        let mut state = NeuronState::new(&neuron.id, decay_rate);
        state.created_at = created;
        state.activation_level = 1.0;
        store.upsert_state(&state).unwrap();
        neuron.id
    }

    #[test]
    fn fact_neuron_decays_on_the_exponential_curve() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let t0 = Utc::now() - Duration::days(30);
        let id = seed_state(&store, 0.02, t0);

        let report = DecayManager::new(&store, &config)
            .run(t0 + Duration::days(30), false)
            .unwrap();
        assert_eq!(report.states_decayed, 1);

        let state = store.get_state(&id).unwrap().unwrap();
        // e^(-0.02 * 30) = e^(-0.6) ≈ 0.5488
        assert!((state.activation_level - (-0.6f64).exp()).abs() < 1e-3);
        assert_eq!(report.prune_eligible, 0);
    }

    #[test]
    fn todo_neuron_decays_below_prune_threshold() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let t0 = Utc::now() - Duration::days(30);
        let id = seed_state(&store, 0.15, t0);

        let report = DecayManager::new(&store, &config)
            .run(t0 + Duration::days(30), false)
            .unwrap();

        let state = store.get_state(&id).unwrap().unwrap();
        // e^(-0.15 * 30) = e^(-4.5) ≈ 0.0111 < 0.02
        assert!((state.activation_level - (-4.5f64).exp()).abs() < 1e-3);
        assert_eq!(report.prune_eligible, 1);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let t0 = Utc::now() - Duration::days(30);
        let id = seed_state(&store, 0.15, t0);

        let report = DecayManager::new(&store, &config)
            .run(t0 + Duration::days(30), true)
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.states_decayed, 1);

        let state = store.get_state(&id).unwrap().unwrap();
        assert_eq!(state.activation_level, 1.0);
    }

    #[test]
    fn repeated_runs_do_not_double_decay() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let t0 = Utc::now() - Duration::days(30);
        let id = seed_state(&store, 0.02, t0);
        let manager = DecayManager::new(&store, &config);

        let now = t0 + Duration::days(30);
        manager.run(now, false).unwrap();
        let after_first = store.get_state(&id).unwrap().unwrap().activation_level;

        // Running again at (almost) the same instant must be a no-op.
        manager.run(now + Duration::seconds(1), false).unwrap();
        let after_second = store.get_state(&id).unwrap().unwrap().activation_level;
        assert!((after_first - after_second).abs() < 1e-6);
    }

    #[test]
    fn inferred_unreinforced_synapses_decay_double() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let t0 = Utc::now() - Duration::days(10);

        let a = seed_state(&store, 0.02, t0);
        let b = seed_state(&store, 0.05, t0);
        let mut inferred =
            crate::core::Synapse::new(&a, &b, crate::core::SynapseType::RelatedTo, 0.5).inferred();
        inferred.created_at = t0;
        store.add_synapse(&inferred).unwrap();
        let mut organic = crate::core::Synapse::new(&a, &b, crate::core::SynapseType::CoOccurs, 0.5);
        organic.created_at = t0;
        store.add_synapse(&organic).unwrap();

        DecayManager::new(&store, &config)
            .run(t0 + Duration::days(10), false)
            .unwrap();

        let inferred_after = store.get_synapse(&inferred.id).unwrap().unwrap();
        let organic_after = store.get_synapse(&organic.id).unwrap().unwrap();
        // 0.5 * e^(-2 * 0.1 * 10) = 0.5 * e^(-2)
        assert!((inferred_after.weight - 0.5 * (-2.0f64).exp()).abs() < 1e-6);
        assert_eq!(organic_after.weight, 0.5);
    }
}
