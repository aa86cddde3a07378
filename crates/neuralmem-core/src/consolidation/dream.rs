//! DREAM: speculative replay.
//!
//! Samples a handful of neurons pseudo-randomly, runs a short spreading
//! pass from each, and links surprising pairs (activated together, never
//! connected) with a very weak RELATED_TO. Dream links decay ten times
//! faster than normal and only survive if something later reinforces them.

use chrono::{DateTime, Utc};

use super::RunContext;
use crate::core::{BrainConfig, Synapse, SynapseType};
use crate::engine::SpreadingActivation;
use crate::storage::{Result, SqliteStore};

/// Neurons sampled per dream.
const DREAM_SAMPLES: usize = 10;

/// Hop budget for each replay spread.
const DREAM_HOPS: u32 = 2;

/// Weight of a freshly dreamed link.
const DREAM_WEIGHT: f64 = 0.1;

/// Dream links decay this many times faster until reinforced.
const DREAM_DECAY_MULTIPLIER: f64 = 10.0;

/// Deterministic xorshift so a dream can be replayed from its seed.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

pub fn run(
    store: &SqliteStore,
    config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    let total = store.count_neurons()?;
    if total == 0 {
        return Ok(());
    }

    // Sample ids by offset; the timestamp seeds the walk.
    let mut rng = XorShift(now.timestamp() as u64 | 1);
    let want = DREAM_SAMPLES.min(total as usize);
    let mut seeds: Vec<String> = Vec::new();
    for _ in 0..DREAM_SAMPLES * 4 {
        if seeds.len() >= want {
            break;
        }
        let offset = rng.next() % total;
        if let Some(neuron) = store.all_neurons(offset, 1)?.into_iter().next() {
            if !seeds.contains(&neuron.id) {
                seeds.push(neuron.id);
            }
        }
    }
    ctx.examined = seeds.len() as u64;

    let engine = SpreadingActivation::new(store, config);
    let mut created = 0usize;

    for seed in &seeds {
        if ctx.expired() || created >= config.max_inferences_per_run {
            break;
        }
        let map = engine.spread(&[(seed.clone(), 1.0)], DREAM_HOPS, now)?;

        // Surprising pairs: co-activated in this replay, never linked.
        let mut activated: Vec<&String> = map.keys().collect();
        activated.sort();
        for i in 0..activated.len() {
            for j in (i + 1)..activated.len() {
                if created >= config.max_inferences_per_run {
                    break;
                }
                let (a, b) = (activated[i], activated[j]);
                if store.get_synapse_between(a, b)?.is_some()
                    || store.get_synapse_between(b, a)?.is_some()
                {
                    continue;
                }
                ctx.created += 1;
                created += 1;
                ctx.note(format!("dreamed link {a} ~ {b}"));
                if ctx.dry_run {
                    continue;
                }
                let mut synapse = Synapse::new(a, b, SynapseType::RelatedTo, DREAM_WEIGHT)
                    .inferred()
                    .bidirectional()
                    .with_metadata("_dream", serde_json::Value::Bool(true));
                if let Some(mult) = serde_json::Number::from_f64(DREAM_DECAY_MULTIPLIER) {
                    synapse
                        .metadata
                        .insert("_decay_multiplier".into(), serde_json::Value::Number(mult));
                }
                synapse.created_at = now;
                store.add_synapse(&synapse)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Neuron, NeuronState, NeuronType};

    fn chain(store: &SqliteStore, n: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..n {
            let neuron = Neuron::new(NeuronType::Concept, format!("c{i}"));
            store.add_neuron(&neuron).unwrap();
            store
                .upsert_state(&NeuronState::new(&neuron.id, 0.02))
                .unwrap();
            ids.push(neuron.id);
        }
        for pair in ids.windows(2) {
            store
                .add_synapse(&Synapse::new(&pair[0], &pair[1], SynapseType::LeadsTo, 0.9))
                .unwrap();
        }
        ids
    }

    #[test]
    fn dream_links_unconnected_co_activated_pairs() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        // a → b → c: a and c co-activate in a replay but are not linked.
        chain(&store, 3);

        let mut ctx = RunContext::for_tests(false);
        run(&store, &config, Utc::now(), &mut ctx).unwrap();

        let dreamed: Vec<Synapse> = store
            .all_synapses(0, 100)
            .unwrap()
            .into_iter()
            .filter(|s| {
                s.metadata
                    .get("_dream")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false)
            })
            .collect();
        assert!(!dreamed.is_empty());
        for s in &dreamed {
            assert!((s.weight - DREAM_WEIGHT).abs() < 1e-9);
            assert!(s.is_inferred());
        }
    }

    #[test]
    fn empty_brain_dreams_of_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let mut ctx = RunContext::for_tests(false);
        run(&store, &config, Utc::now(), &mut ctx).unwrap();
        assert_eq!(ctx.created, 0);
    }

    #[test]
    fn dry_run_creates_no_links() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        chain(&store, 3);
        let before = store.count_synapses().unwrap();

        let mut ctx = RunContext::for_tests(true);
        run(&store, &config, Utc::now(), &mut ctx).unwrap();
        assert_eq!(store.count_synapses().unwrap(), before);
    }
}
