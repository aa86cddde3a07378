//! Classic spreading activation.
//!
//! Best-first BFS from anchor neurons: a priority queue ordered by
//! decreasing activation pops the strongest frontier node, propagates along
//! its synapses with per-hop decay, and accumulates level on every neuron
//! reached. Refractory neurons are skipped; a hard queue cap bounds
//! pathological graphs.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::core::{BrainConfig, NeuronState};
use crate::storage::{Result, SqliteStore};

/// Safety bound on queued propagation entries per retrieval.
pub const MAX_QUEUE_ENTRIES: usize = 50_000;

/// Activation accumulated on one neuron.
#[derive(Debug, Clone)]
pub struct ActivationResult {
    pub neuron_id: String,
    /// Accumulated activation (summed across anchors).
    pub level: f64,
    /// Hop distance from the nearest anchor.
    pub hops: u32,
    /// Neuron path from that anchor.
    pub path: Vec<String>,
    /// The anchor that first reached this neuron.
    pub source_anchor: String,
    /// Every anchor that contributed activation.
    pub sources: HashSet<String>,
}

/// Map of neuron id → accumulated activation.
pub type ActivationMap = HashMap<String, ActivationResult>;

struct QueueEntry {
    level: f64,
    /// Weight of the synapse that produced this entry (tie-break).
    edge_weight: f64,
    /// `last_activated` of the neuron, older first (tie-break).
    last_activated: Option<DateTime<Utc>>,
    neuron_id: String,
    hops: u32,
    path: Vec<String>,
    source: String,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Max-heap order: higher level first; ties go to the heavier edge,
    /// then the older neuron, then lexicographic id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .total_cmp(&other.level)
            .then(self.edge_weight.total_cmp(&other.edge_weight))
            .then(match (self.last_activated, other.last_activated) {
                // Older (smaller) timestamps win: reverse the natural order.
                (Some(a), Some(b)) => b.cmp(&a),
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (None, None) => Ordering::Equal,
            })
            .then(other.neuron_id.cmp(&self.neuron_id))
    }
}

/// Classic spreading activation over the synapse graph.
pub struct SpreadingActivation<'a> {
    store: &'a SqliteStore,
    config: &'a BrainConfig,
}

impl<'a> SpreadingActivation<'a> {
    pub fn new(store: &'a SqliteStore, config: &'a BrainConfig) -> Self {
        Self { store, config }
    }

    /// Spread from `anchors` (id, seed weight) up to `max_hops`.
    ///
    /// Per hop the candidate activation on a neighbor `m` of `n` is
    /// `a_n · w_synapse · (1 - decay_rate)`; contributions from different
    /// anchors sum. Candidates below `activation_threshold` are pruned.
    pub fn spread(
        &self,
        anchors: &[(String, f64)],
        max_hops: u32,
        now: DateTime<Utc>,
    ) -> Result<ActivationMap> {
        let mut results: ActivationMap = HashMap::new();
        let mut queue: BinaryHeap<QueueEntry> = BinaryHeap::new();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        let mut state_cache: HashMap<String, Option<NeuronState>> = HashMap::new();
        let mut queued = 0usize;

        // Seed with anchors that actually exist.
        let anchor_ids: Vec<String> = anchors.iter().map(|(id, _)| id.clone()).collect();
        let known = self.store.get_neurons(&anchor_ids)?;
        let known_ids: HashSet<&str> = known.iter().map(|n| n.id.as_str()).collect();
        self.warm_states(&anchor_ids, &mut state_cache)?;

        for (anchor_id, seed) in anchors {
            if !known_ids.contains(anchor_id.as_str()) {
                continue;
            }
            if self.in_refractory(anchor_id, &state_cache, now) {
                continue;
            }
            accumulate(
                &mut results,
                anchor_id,
                *seed,
                0,
                vec![anchor_id.clone()],
                anchor_id,
            );
            queue.push(QueueEntry {
                level: *seed,
                edge_weight: 1.0,
                last_activated: self.last_activated(anchor_id, &state_cache),
                neuron_id: anchor_id.clone(),
                hops: 0,
                path: vec![anchor_id.clone()],
                source: anchor_id.clone(),
            });
            queued += 1;
        }

        let decay_keep = 1.0 - self.config.decay_rate;

        while let Some(current) = queue.pop() {
            let visit_key = (current.neuron_id.clone(), current.source.clone());
            if !visited.insert(visit_key) {
                continue;
            }
            if current.hops >= max_hops {
                continue;
            }

            let edges = self.store.synapses_for_neurons(&[current.neuron_id.clone()])?;
            let mut neighbor_ids: Vec<String> = Vec::new();
            let mut candidates: Vec<(String, f64, f64)> = Vec::new();

            for edge in &edges {
                // Edges conduct both ways during discovery; associative
                // recall must reach an anchor's context, not just its
                // consequences.
                let neighbor = if edge.source_id == current.neuron_id {
                    &edge.target_id
                } else {
                    &edge.source_id
                };
                if neighbor == &current.neuron_id {
                    continue;
                }
                let level = current.level * edge.weight * decay_keep;
                if level < self.config.activation_threshold {
                    continue;
                }
                neighbor_ids.push(neighbor.clone());
                candidates.push((neighbor.clone(), level, edge.weight));
            }

            self.warm_states(&neighbor_ids, &mut state_cache)?;

            for (neighbor, level, edge_weight) in candidates {
                if self.in_refractory(&neighbor, &state_cache, now) {
                    continue;
                }
                let mut path = current.path.clone();
                path.push(neighbor.clone());
                accumulate(
                    &mut results,
                    &neighbor,
                    level,
                    current.hops + 1,
                    path.clone(),
                    &current.source,
                );
                if queued >= MAX_QUEUE_ENTRIES {
                    continue;
                }
                queue.push(QueueEntry {
                    level,
                    edge_weight,
                    last_activated: self.last_activated(&neighbor, &state_cache),
                    neuron_id: neighbor,
                    hops: current.hops + 1,
                    path,
                    source: current.source.clone(),
                });
                queued += 1;
            }
        }

        Ok(results)
    }

    fn warm_states(
        &self,
        ids: &[String],
        cache: &mut HashMap<String, Option<NeuronState>>,
    ) -> Result<()> {
        let missing: Vec<String> = ids
            .iter()
            .filter(|id| !cache.contains_key(*id))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let mut fetched = self.store.get_states(&missing)?;
        for id in missing {
            let state = fetched.remove(&id);
            cache.insert(id, state);
        }
        Ok(())
    }

    fn in_refractory(
        &self,
        id: &str,
        cache: &HashMap<String, Option<NeuronState>>,
        now: DateTime<Utc>,
    ) -> bool {
        cache
            .get(id)
            .and_then(|s| s.as_ref())
            .map(|s| s.in_refractory(now))
            .unwrap_or(false)
    }

    fn last_activated(
        &self,
        id: &str,
        cache: &HashMap<String, Option<NeuronState>>,
    ) -> Option<DateTime<Utc>> {
        cache.get(id).and_then(|s| s.as_ref()).and_then(|s| s.last_activated)
    }
}

fn accumulate(
    results: &mut ActivationMap,
    neuron_id: &str,
    level: f64,
    hops: u32,
    path: Vec<String>,
    source: &str,
) {
    match results.get_mut(neuron_id) {
        Some(existing) => {
            // Contributions from distinct anchors sum; revisits from the
            // same anchor keep the strongest single value.
            if existing.sources.insert(source.to_string()) {
                existing.level += level;
            } else if level > existing.level {
                existing.level = level;
            }
            if hops < existing.hops {
                existing.hops = hops;
                existing.path = path;
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
                    path,
                    source_anchor: source.to_string(),
                    sources: HashSet::from([source.to_string()]),
                },
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
