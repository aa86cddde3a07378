//! Reflex (trail) activation.
//!
//! Instead of exploring the whole graph, reflex mode conducts signal along
//! established fiber pathways, forward and backward from each anchor. The
//! trail decay folds in synapse weight, fiber conductivity, and a time
//! factor that favors recently conducted fibers. Hybrid mode adds a short
//! discovery pass of classic spreading on top, down-weighted so reflex
//! results stay ranked higher.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::activation::{ActivationMap, ActivationResult, SpreadingActivation};
use crate::core::{BrainConfig, Fiber};
use crate::storage::{Result, SqliteStore};

/// Per-hop trail decay along a pathway.
const TRAIL_DECAY: f64 = 0.15;

/// Discovery-pass contribution multiplier in hybrid mode.
const DISCOVERY_WEIGHT: f64 = 0.6;

/// Trail-based activation through fiber pathways.
pub struct ReflexActivation<'a> {
    store: &'a SqliteStore,
    config: &'a BrainConfig,
}

impl<'a> ReflexActivation<'a> {
    pub fn new(store: &'a SqliteStore, config: &'a BrainConfig) -> Self {
        Self { store, config }
    }

    /// Conduct activation along the pathways of `fibers` from every anchor
    /// present in them.
    ///
    /// Trail decay per step:
    /// `a' = a · (1 - decay) · w_synapse · conductivity · time_factor`.
    pub fn activate_trail(
        &self,
        anchors: &[(String, f64)],
        fibers: &[Fiber],
        now: DateTime<Utc>,
    ) -> Result<ActivationMap> {
        let mut results: ActivationMap = HashMap::new();

        for (anchor_id, seed) in anchors {
            if self.store.get_neuron(anchor_id)?.is_none() {
                continue;
            }
            accumulate_trail(&mut results, anchor_id, *seed, 0, anchor_id);
        }

        for fiber in fibers {
            let fiber_anchors: Vec<&(String, f64)> = anchors
                .iter()
                .filter(|(id, _)| fiber.is_in_pathway(id))
                .collect();
            if fiber_anchors.is_empty() {
                continue;
            }

            let time_factor = fiber.time_factor(now);
            let pair_weights = self.pathway_weights(fiber)?;

            for (anchor_id, seed) in fiber_anchors {
                let Some(start) = fiber.pathway_position(anchor_id) else {
                    continue;
                };
                self.conduct(
                    &mut results,
                    fiber,
                    &pair_weights,
                    start,
                    1,
                    anchor_id,
                    *seed,
                    time_factor,
                );
                self.conduct(
                    &mut results,
                    fiber,
                    &pair_weights,
                    start,
                    -1,
                    anchor_id,
                    *seed,
                    time_factor,
                );
            }
        }

        Ok(results)
    }

    /// Hybrid mode: reflex first, then a classic discovery pass limited to
    /// half the hop budget, merged at reduced weight.
    pub fn activate_hybrid(
        &self,
        anchors: &[(String, f64)],
        fibers: &[Fiber],
        max_hops: u32,
        now: DateTime<Utc>,
    ) -> Result<ActivationMap> {
        let mut combined = self.activate_trail(anchors, fibers, now)?;

        let discovery_hops = (max_hops / 2).max(1);
        let discovery = SpreadingActivation::new(self.store, self.config)
            .spread(anchors, discovery_hops, now)?;

        for (neuron_id, found) in discovery {
            match combined.get_mut(&neuron_id) {
                Some(existing) => {
                    existing.level += found.level * DISCOVERY_WEIGHT;
                    existing.sources.extend(found.sources);
                }
                None => {
                    let mut demoted = found;
                    demoted.level *= DISCOVERY_WEIGHT;
                    combined.insert(neuron_id, demoted);
                }
            }
        }

        Ok(combined)
    }

    /// Synapse weights between adjacent pathway neurons, defaulting to 0.5
    /// where no direct synapse exists.
    fn pathway_weights(&self, fiber: &Fiber) -> Result<HashMap<(usize, usize), f64>> {
        let mut weights = HashMap::new();
        for i in 0..fiber.pathway.len().saturating_sub(1) {
            let a = &fiber.pathway[i];
            let b = &fiber.pathway[i + 1];
            let weight = match self.store.get_synapse_between(a, b)? {
                Some(s) => s.weight,
                None => match self.store.get_synapse_between(b, a)? {
                    Some(s) => s.weight,
                    None => 0.5,
                },
            };
            weights.insert((i, i + 1), weight);
            weights.insert((i + 1, i), weight);
        }
        Ok(weights)
    }

    #[allow(clippy::too_many_arguments)]
    fn conduct(
        &self,
        results: &mut ActivationMap,
        fiber: &Fiber,
        pair_weights: &HashMap<(usize, usize), f64>,
        start: usize,
        direction: i64,
        anchor_id: &str,
        seed: f64,
        time_factor: f64,
    ) {
        let mut level = seed;
        let mut pos = start as i64;
        let mut hops = 0u32;

        loop {
            let prev = pos;
            pos += direction;
            if pos < 0 || pos as usize >= fiber.pathway.len() {
                break;
            }
            hops += 1;

            let weight = pair_weights
                .get(&(prev as usize, pos as usize))
                .copied()
                .unwrap_or(0.5);
            level = level * (1.0 - TRAIL_DECAY) * weight * fiber.conductivity * time_factor;
            if level < self.config.activation_threshold {
                break;
            }

            let neuron_id = &fiber.pathway[pos as usize];
            accumulate_trail(results, neuron_id, level, hops, anchor_id);
        }
    }
}

fn accumulate_trail(
    results: &mut ActivationMap,
    neuron_id: &str,
    level: f64,
    hops: u32,
    source: &str,
) {
    match results.get_mut(neuron_id) {
        Some(existing) => {
            if existing.sources.insert(source.to_string()) {
                existing.level += level;
            } else if level > existing.level {
                existing.level = level;
            }
            if hops < existing.hops {
                existing.hops = hops;
                existing.source_anchor = source.to_string();
            }
        }
        None => {
            results.insert(
                neuron_id.to_string(),
                ActivationResult {
                    neuron_id: neuron_id.to_string(),
                    level,
                    hops,
                    path: vec![source.to_string(), neuron_id.to_string()],
                    source_anchor: source.to_string(),
                    sources: HashSet::from([source.to_string()]),
                },
            );
        }
    }
}

/// Co-activation binding boost: a neuron reached from two or more distinct
/// anchor sets gains `co_fire_count / anchor_set_count`. `set_of` maps each
/// anchor id to its set index.
pub fn apply_co_activation_boost(
    map: &mut ActivationMap,
    set_of: &HashMap<String, usize>,
    set_count: usize,
) {
    if set_count < 2 {
        return;
    }
    for result in map.values_mut() {
        let co_fire: HashSet<usize> = result
            .sources
            .iter()
            .filter_map(|anchor| set_of.get(anchor).copied())
            .collect();
        if co_fire.len() >= 2 {
            result.level += co_fire.len() as f64 / set_count as f64;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Neuron, NeuronType, Synapse, SynapseType};
    use std::collections::BTreeSet;

    fn build_fiber(store: &SqliteStore, contents: &[&str], weight: f64) -> (Fiber, Vec<String>) {
        let mut ids = Vec::new();
        for c in contents {
            let n = Neuron::new(NeuronType::Concept, *c);
            store.add_neuron(&n).unwrap();
            ids.push(n.id);
        }
        let mut synapse_ids = BTreeSet::new();
        for pair in ids.windows(2) {
            let s = Synapse::new(&pair[0], &pair[1], SynapseType::CoOccurs, weight);
            store.add_synapse(&s).unwrap();
            synapse_ids.insert(s.id);
        }
        let fiber = Fiber::create(
            ids.iter().cloned().collect(),
            synapse_ids,
            ids[0].clone(),
            ids.clone(),
            contents.join(" "),
        )
        .unwrap();
        store.add_fiber(&fiber).unwrap();
        (fiber, ids)
    }

    #[test]
    fn trail_conducts_forward_and_backward() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let (fiber, ids) = build_fiber(&store, &["a", "b", "c"], 0.9);

        let engine = ReflexActivation::new(&store, &config);
        let now = Utc::now();
        // Anchor in the middle: both neighbors should light up.
        let map = engine
            .activate_trail(&[(ids[1].clone(), 1.0)], &[fiber], now)
            .unwrap();

        assert!(map.contains_key(&ids[0]));
        assert!(map.contains_key(&ids[2]));
        // Fresh fiber (never conducted): time factor 0.5.
        // 1.0 * 0.85 * 0.9 * 1.0 * 0.5 = 0.3825
        assert!((map[&ids[2]].level - 0.3825).abs() < 1e-9);
    }

    #[test]
    fn stale_fiber_conducts_at_the_floor() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let (mut fiber, ids) = build_fiber(&store, &["a", "b"], 0.9);
        let now = Utc::now();
        fiber.last_conducted = Some(now - chrono::Duration::days(60));
        store.update_fiber(&fiber).unwrap();
        let fiber = store.get_fiber(&fiber.id).unwrap().unwrap();

        let engine = ReflexActivation::new(&store, &config);
        let map = engine
            .activate_trail(&[(ids[0].clone(), 1.0)], &[fiber], now)
            .unwrap();

        // 0.85 * 0.9 * 1.0 * 0.1 = 0.0765 < threshold: conduction dies.
        assert!(!map.contains_key(&ids[1]));
    }

    #[test]
    fn hybrid_down_weights_discovery_results() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let (fiber, ids) = build_fiber(&store, &["a", "b"], 0.9);

        // An off-fiber neuron reachable only by classic spreading.
        let stray = Neuron::new(NeuronType::Concept, "stray");
        store.add_neuron(&stray).unwrap();
        store
            .add_synapse(&Synapse::new(&ids[0], &stray.id, SynapseType::RelatedTo, 0.9))
            .unwrap();

        let engine = ReflexActivation::new(&store, &config);
        let now = Utc::now();
        let map = engine
            .activate_hybrid(&[(ids[0].clone(), 1.0)], &[fiber], 4, now)
            .unwrap();

        let on_trail = map[&ids[1]].level;
        let discovered = map[&stray.id].level;
        // Same edge weight, but the discovery contribution is scaled by 0.6
        // relative to classic spreading alone.
        assert!((discovered - 0.9 * 0.9 * 0.6).abs() < 1e-9);
        assert!(on_trail > 0.0);
    }

    #[test]
    fn co_activation_boost_rewards_multi_set_neurons() {
        let mut map: ActivationMap = HashMap::new();
        map.insert(
            "shared".into(),
            ActivationResult {
                neuron_id: "shared".into(),
                level: 0.5,
                hops: 1,
                path: vec![],
                source_anchor: "a".into(),
                sources: HashSet::from(["a".to_string(), "b".to_string()]),
            },
        );
        map.insert(
            "solo".into(),
            ActivationResult {
                neuron_id: "solo".into(),
                level: 0.5,
                hops: 1,
                path: vec![],
                source_anchor: "a".into(),
                sources: HashSet::from(["a".to_string()]),
            },
        );

        // "a" is a time anchor (set 0), "b" an entity anchor (set 1).
        let set_of: HashMap<String, usize> =
            [("a".to_string(), 0), ("b".to_string(), 1)].into();
        apply_co_activation_boost(&mut map, &set_of, 2);
        assert!((map["shared"].level - 1.5).abs() < 1e-9);
        assert!((map["solo"].level - 0.5).abs() < 1e-9);
    }
}
