//! INFER: turn repeated co-activation into structure.
//!
//! Pairs that co-activated at least `co_activation_threshold` times inside
//! the window either gain a new inferred CO_OCCURS synapse (weight
//! `count / 10`, capped) or reinforce the synapse they already have.
//! Clusters of co-activated neurons also contribute associative tags to
//! the fibers that hold them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::RunContext;
use crate::core::{BrainConfig, NeuronType, Synapse, SynapseType, W_MAX};
use crate::storage::{Result, SqliteStore};

pub fn run(
    store: &SqliteStore,
    config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    let since = now - Duration::days(config.co_activation_window_days);
    let counts = store.co_activation_counts(since)?;
    ctx.examined = counts.len() as u64;

    let mut qualifying: Vec<(String, String, u32)> = Vec::new();
    for pair in counts {
        if pair.count < config.co_activation_threshold {
            continue;
        }
        qualifying.push((pair.neuron_a, pair.neuron_b, pair.count));
    }

    let mut inferences = 0usize;
    for (a, b, count) in &qualifying {
        if ctx.expired() || inferences >= config.max_inferences_per_run {
            break;
        }
        // Both neurons must still exist; co-activation events outlive
        // pruned neurons.
        if store.get_neuron(a)?.is_none() || store.get_neuron(b)?.is_none() {
            continue;
        }

        let existing = match store.get_synapse_between(a, b)? {
            Some(s) => Some(s),
            None => store.get_synapse_between(b, a)?,
        };
        match existing {
            Some(synapse) => {
                let new_weight =
                    (synapse.weight + config.reinforcement_delta).min(W_MAX);
                ctx.changed += 1;
                if !ctx.dry_run {
                    store.update_synapse(
                        &synapse.id,
                        new_weight,
                        synapse.reinforced_count + 1,
                        Some(now),
                    )?;
                }
            }
            None => {
                let weight = (*count as f64 / 10.0).min(1.0);
                ctx.created += 1;
                ctx.note(format!("inferred co_occurs {a} ↔ {b} (count {count})"));
                if !ctx.dry_run {
                    let mut synapse =
                        Synapse::new(a, b, SynapseType::CoOccurs, weight).inferred().bidirectional();
                    synapse.created_at = now;
                    store.add_synapse(&synapse)?;
                }
            }
        }
        inferences += 1;
    }

    if !ctx.dry_run {
        associative_tags(store, &qualifying, ctx)?;
        store.prune_co_activations(since)?;
    }

    Ok(())
}

/// Tag fibers that hold two or more members of a co-activation cluster
/// with the cluster's dominant content word.
fn associative_tags(
    store: &SqliteStore,
    qualifying: &[(String, String, u32)],
    ctx: &mut RunContext,
) -> Result<()> {
    use crate::util::UnionFind;

    if qualifying.is_empty() {
        return Ok(());
    }

    // Index neurons participating in qualifying pairs.
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut ids: Vec<&str> = Vec::new();
    for (a, b, _) in qualifying {
        for id in [a.as_str(), b.as_str()] {
            if !index.contains_key(id) {
                index.insert(id, ids.len());
                ids.push(id);
            }
        }
    }

    let mut uf = UnionFind::new(ids.len());
    for (a, b, _) in qualifying {
        uf.union(index[a.as_str()], index[b.as_str()]);
    }

    for (_, members) in uf.groups() {
        if members.len() < 2 || ctx.expired() {
            continue;
        }
        let member_ids: Vec<String> = members.iter().map(|&i| ids[i].to_string()).collect();
        let neurons = store.get_neurons(&member_ids)?;

        // The cluster tag is its first entity or concept, lexicographically.
        let Some(tag) = neurons
            .iter()
            .filter(|n| {
                matches!(n.neuron_type, NeuronType::Entity | NeuronType::Concept)
            })
            .map(|n| n.canonical_content())
            .min()
        else {
            continue;
        };

        for mut fiber in store.find_fibers_containing_any(&member_ids)? {
            let overlap = member_ids
                .iter()
                .filter(|id| fiber.contains_neuron(id))
                .count();
            if overlap < 2 || fiber.auto_tags.contains(&tag) {
                continue;
            }
            fiber.auto_tags.insert(tag.clone());
            store.update_fiber(&fiber)?;
            ctx.changed += 1;
        }
    }

    Ok(())
}
