//! Pattern extraction: episodic fibers condense into semantic concepts.
//!
//! Episodic fibers are clustered by tag Jaccard similarity with Union-Find.
//! A cluster of three or more yields a new CONCEPT neuron named after the
//! most frequent shared entity, with IS_A synapses from each common entity
//! into the concept.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Fiber, MaturationStage, Neuron, NeuronState, NeuronType, Synapse, SynapseType};
use crate::storage::{Result, SqliteStore};
use crate::util::UnionFind;

/// Minimum tag Jaccard for two fibers to cluster.
const CLUSTER_JACCARD: f64 = 0.6;

/// Minimum cluster size that yields a concept.
const MIN_CLUSTER_SIZE: usize = 3;

/// Report of one pattern-extraction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternReport {
    pub fibers_examined: usize,
    pub clusters_found: usize,
    pub concepts_created: usize,
    pub synapses_created: usize,
    pub dry_run: bool,
}

/// Cluster episodic fibers and promote recurring structure to concepts.
pub fn extract_patterns(
    store: &SqliteStore,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<PatternReport> {
    let episodic = store.find_maturations_by_stage(MaturationStage::Episodic)?;
    let mut fibers: Vec<Fiber> = Vec::with_capacity(episodic.len());
    for m in &episodic {
        if let Some(f) = store.get_fiber(&m.fiber_id)? {
            fibers.push(f);
        }
    }

    let mut report = PatternReport {
        fibers_examined: fibers.len(),
        clusters_found: 0,
        concepts_created: 0,
        synapses_created: 0,
        dry_run,
    };
    if fibers.len() < MIN_CLUSTER_SIZE {
        return Ok(report);
    }

    let mut uf = UnionFind::new(fibers.len());
    for i in 0..fibers.len() {
        for j in (i + 1)..fibers.len() {
            if fibers[i].tag_jaccard(&fibers[j]) >= CLUSTER_JACCARD {
                uf.union(i, j);
            }
        }
    }

    for (_, members) in uf.groups() {
        if members.len() < MIN_CLUSTER_SIZE {
            continue;
        }
        report.clusters_found += 1;

        // Entities shared across the cluster, counted by occurrences.
        let mut entity_counts: HashMap<String, (usize, String)> = HashMap::new();
        for &idx in &members {
            let ids: Vec<String> = fibers[idx].neuron_ids.iter().cloned().collect();
            for neuron in store.get_neurons(&ids)? {
                if neuron.neuron_type == NeuronType::Entity {
                    let entry = entity_counts
                        .entry(neuron.canonical_content())
                        .or_insert((0, neuron.id.clone()));
                    entry.0 += 1;
                }
            }
        }
        let mut common: Vec<(&String, &(usize, String))> = entity_counts
            .iter()
            .filter(|(_, (count, _))| *count >= MIN_CLUSTER_SIZE)
            .collect();
        if common.is_empty() {
            continue;
        }
        common.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.0.cmp(b.0)));

        let concept_name = common[0].0.clone();
        if store
            .find_neuron_by_content(NeuronType::Concept, &concept_name)?
            .is_some()
        {
            continue;
        }

        report.concepts_created += 1;
        report.synapses_created += common.len();
        if dry_run {
            continue;
        }

        let mut concept = Neuron::new(NeuronType::Concept, concept_name.clone());
        concept.created_at = now;
        store.add_neuron(&concept)?;
        let mut state = NeuronState::new(&concept.id, 0.02);
        state.created_at = now;
        store.upsert_state(&state)?;

        for (_, (_, entity_id)) in &common {
            let mut synapse = Synapse::new(entity_id, &concept.id, SynapseType::IsA, 0.6);
            synapse.created_at = now;
            store.add_synapse(&synapse)?;
        }
        tracing::info!(concept = %concept_name, cluster = members.len(), "pattern promoted to concept");
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Maturation;
    use std::collections::BTreeSet;

    fn episodic_fiber(store: &SqliteStore, entity_id: &str, tags: &[&str]) -> Fiber {
        let filler = Neuron::new(NeuronType::Concept, format!("filler-{}", uuid::Uuid::new_v4()));
        store.add_neuron(&filler).unwrap();
        let mut fiber = Fiber::create(
            BTreeSet::from([entity_id.to_string(), filler.id.clone()]),
            BTreeSet::new(),
            entity_id.to_string(),
            vec![entity_id.to_string(), filler.id],
            "standup notes".into(),
        )
        .unwrap();
        fiber.auto_tags = tags.iter().map(|t| t.to_string()).collect();
        store.add_fiber(&fiber).unwrap();

        let now = Utc::now();
        let mut m = Maturation::new(&fiber.id, now);
        m.stage = MaturationStage::Episodic;
        store.save_maturation(&m).unwrap();
        fiber
    }

    #[test]
    fn recurring_cluster_yields_concept_with_is_a_links() {
        let store = SqliteStore::in_memory().unwrap();
        let alice = Neuron::new(NeuronType::Entity, "alice");
        store.add_neuron(&alice).unwrap();

        for _ in 0..3 {
            episodic_fiber(&store, &alice.id, &["standup", "team"]);
        }

        let report = extract_patterns(&store, Utc::now(), false).unwrap();
        assert_eq!(report.clusters_found, 1);
        assert_eq!(report.concepts_created, 1);

        let concept = store
            .find_neuron_by_content(NeuronType::Concept, "alice")
            .unwrap()
            .expect("concept neuron created");
        let is_a = store.synapses_of_type(SynapseType::IsA).unwrap();
        assert!(is_a
            .iter()
            .any(|s| s.source_id == alice.id && s.target_id == concept.id));
    }

    #[test]
    fn small_clusters_are_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        let alice = Neuron::new(NeuronType::Entity, "alice");
        store.add_neuron(&alice).unwrap();
        for _ in 0..2 {
            episodic_fiber(&store, &alice.id, &["standup"]);
        }

        let report = extract_patterns(&store, Utc::now(), false).unwrap();
        assert_eq!(report.concepts_created, 0);
    }

    #[test]
    fn dissimilar_tags_do_not_cluster() {
        let store = SqliteStore::in_memory().unwrap();
        let alice = Neuron::new(NeuronType::Entity, "alice");
        store.add_neuron(&alice).unwrap();
        episodic_fiber(&store, &alice.id, &["standup"]);
        episodic_fiber(&store, &alice.id, &["deploy"]);
        episodic_fiber(&store, &alice.id, &["retro"]);

        let report = extract_patterns(&store, Utc::now(), false).unwrap();
        assert_eq!(report.clusters_found, 0);
    }

    #[test]
    fn dry_run_creates_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        let alice = Neuron::new(NeuronType::Entity, "alice");
        store.add_neuron(&alice).unwrap();
        for _ in 0..3 {
            episodic_fiber(&store, &alice.id, &["standup", "team"]);
        }

        let report = extract_patterns(&store, Utc::now(), true).unwrap();
        assert_eq!(report.concepts_created, 1);
        assert!(store
            .find_neuron_by_content(NeuronType::Concept, "alice")
            .unwrap()
            .is_none());
    }
}
