//! ENRICH: derive structure the encoder could not see.
//!
//! Two passes: transitive closure over causal chains (A caused by B, B
//! caused by C gives an inferred A caused by C), and cross-cluster
//! RELATED_TO links between anchors of fibers that share an entity.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::RunContext;
use crate::core::{BrainConfig, Fiber, NeuronType, Synapse, SynapseType};
use crate::storage::{Result, SqliteStore};

const PAGE: u64 = 500;

pub fn run(
    store: &SqliteStore,
    config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    causal_closure(store, config, now, ctx)?;
    if ctx.expired() {
        return Ok(());
    }
    cross_cluster_links(store, config, now, ctx)?;
    Ok(())
}

/// A→B, B→C ⇒ A→C with weight `0.5 · min(w_AB, w_BC)`, marked inferred.
fn causal_closure(
    store: &SqliteStore,
    config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    let causal = store.synapses_of_type(SynapseType::CausedBy)?;
    ctx.examined += causal.len() as u64;

    let mut by_source: HashMap<&str, Vec<&Synapse>> = HashMap::new();
    for s in &causal {
        by_source.entry(s.source_id.as_str()).or_default().push(s);
    }
    let existing: HashSet<(&str, &str)> = causal
        .iter()
        .map(|s| (s.source_id.as_str(), s.target_id.as_str()))
        .collect();

    let mut created = 0usize;
    for first in &causal {
        if ctx.expired() || created >= config.max_inferences_per_run {
            return Ok(());
        }
        let Some(continuations) = by_source.get(first.target_id.as_str()) else {
            continue;
        };
        for second in continuations {
            if second.target_id == first.source_id {
                continue;
            }
            if existing.contains(&(first.source_id.as_str(), second.target_id.as_str())) {
                continue;
            }
            let weight = 0.5 * first.weight.min(second.weight);
            ctx.created += 1;
            created += 1;
            ctx.note(format!(
                "causal closure {} → {}",
                first.source_id, second.target_id
            ));
            if !ctx.dry_run {
                let mut synapse = Synapse::new(
                    &first.source_id,
                    &second.target_id,
                    SynapseType::CausedBy,
                    weight,
                )
                .inferred();
                synapse.created_at = now;
                store.add_synapse(&synapse)?;
            }
        }
    }
    Ok(())
}

/// Fibers that share an entity get a weak RELATED_TO between their anchors.
fn cross_cluster_links(
    store: &SqliteStore,
    config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    let mut fibers: Vec<Fiber> = Vec::new();
    let mut offset = 0u64;
    loop {
        let page = store.all_fibers(offset, PAGE)?;
        if page.is_empty() {
            break;
        }
        offset += page.len() as u64;
        fibers.extend(page);
    }
    ctx.examined += fibers.len() as u64;

    // entity neuron id -> fibers holding it
    let mut holders: HashMap<String, Vec<&Fiber>> = HashMap::new();
    for fiber in &fibers {
        let ids: Vec<String> = fiber.neuron_ids.iter().cloned().collect();
        for neuron in store.get_neurons(&ids)? {
            if neuron.neuron_type == NeuronType::Entity {
                holders.entry(neuron.id).or_default().push(fiber);
            }
        }
    }

    let mut created = 0usize;
    for (_, group) in holders {
        if group.len() < 2 {
            continue;
        }
        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                if ctx.expired() || created >= config.max_inferences_per_run {
                    return Ok(());
                }
                let (a, b) = (&group[i].anchor_neuron_id, &group[j].anchor_neuron_id);
                if a == b {
                    continue;
                }
                if store.get_synapse_between(a, b)?.is_some()
                    || store.get_synapse_between(b, a)?.is_some()
                {
                    continue;
                }
                ctx.created += 1;
                created += 1;
                if !ctx.dry_run {
                    let mut synapse =
                        Synapse::new(a, b, SynapseType::RelatedTo, 0.3).inferred().bidirectional();
                    synapse.created_at = now;
                    store.add_synapse(&synapse)?;
                }
            }
        }
    }
    Ok(())
}
