//! MERGE: collapse near-duplicate fibers.
//!
//! Fibers sharing an anchor with tag Jaccard ≥ 0.8 merge into the most
//! salient of the group: member and synapse sets union, frequency sums,
//! and the pathway is rebuilt in the deterministic type order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::RunContext;
use crate::core::{BrainConfig, Fiber, Neuron};
use crate::storage::{Result, SqliteStore};
use crate::util::UnionFind;

/// Tag similarity at which two fibers are the same memory.
const MERGE_JACCARD: f64 = 0.8;

const PAGE: u64 = 500;

pub fn run(
    store: &SqliteStore,
    _config: &BrainConfig,
    _now: DateTime<Utc>,
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
    ctx.examined = fibers.len() as u64;
    if fibers.len() < 2 {
        return Ok(());
    }

    let mut uf = UnionFind::new(fibers.len());
    for i in 0..fibers.len() {
        if ctx.expired() {
            return Ok(());
        }
        for j in (i + 1)..fibers.len() {
            if fibers[i].anchor_neuron_id == fibers[j].anchor_neuron_id
                && fibers[i].tag_jaccard(&fibers[j]) >= MERGE_JACCARD
            {
                uf.union(i, j);
            }
        }
    }

    for (_, members) in uf.groups() {
        if members.len() < 2 {
            continue;
        }
        if ctx.expired() {
            return Ok(());
        }

        // The most salient fiber survives; id order breaks ties so reruns
        // pick the same winner.
        let winner_idx = *members
            .iter()
            .max_by(|a, b| {
                fibers[**a]
                    .salience
                    .total_cmp(&fibers[**b].salience)
                    .then(fibers[**b].id.cmp(&fibers[**a].id))
            })
            .expect("group is non-empty");

        let mut merged = fibers[winner_idx].clone();
        for &idx in &members {
            if idx == winner_idx {
                continue;
            }
            let loser = &fibers[idx];
            merged.neuron_ids.extend(loser.neuron_ids.iter().cloned());
            merged.synapse_ids.extend(loser.synapse_ids.iter().cloned());
            merged.auto_tags.extend(loser.auto_tags.iter().cloned());
            merged.agent_tags.extend(loser.agent_tags.iter().cloned());
            merged.frequency = merged.frequency.saturating_add(loser.frequency);
            merged.conductivity = merged.conductivity.max(loser.conductivity);
        }

        // Deterministic pathway over the merged member set.
        let ids: Vec<String> = merged.neuron_ids.iter().cloned().collect();
        let neurons: HashMap<String, Neuron> = store
            .get_neurons(&ids)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        let mut rest: Vec<&Neuron> = neurons
            .values()
            .filter(|n| n.id != merged.anchor_neuron_id)
            .collect();
        rest.sort_by(|a, b| {
            a.neuron_type
                .pathway_rank()
                .cmp(&b.neuron_type.pathway_rank())
                .then(a.canonical_content().cmp(&b.canonical_content()))
        });
        merged.pathway = std::iter::once(merged.anchor_neuron_id.clone())
            .chain(rest.into_iter().map(|n| n.id.clone()))
            .collect();

        ctx.changed += 1;
        ctx.removed += members.len() as u64 - 1;
        ctx.note(format!(
            "merged {} fibers into {}",
            members.len(),
            merged.id
        ));

        if ctx.dry_run {
            continue;
        }
        store.update_fiber(&merged)?;
        for &idx in &members {
            if idx != winner_idx {
                store.delete_fiber(&fibers[idx].id)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NeuronState, NeuronType};
    use std::collections::BTreeSet;

    fn fiber_with_tags(
        store: &SqliteStore,
        anchor: &str,
        extra: &str,
        tags: &[&str],
        salience: f64,
    ) -> Fiber {
        let mut f = Fiber::create(
            BTreeSet::from([anchor.to_string(), extra.to_string()]),
            BTreeSet::new(),
            anchor.to_string(),
            vec![anchor.to_string(), extra.to_string()],
            "memory".into(),
        )
        .unwrap();
        f.salience = salience;
        f.auto_tags = tags.iter().map(|t| t.to_string()).collect();
        store.add_fiber(&f).unwrap();
        f
    }

    fn neuron(store: &SqliteStore, t: NeuronType, content: &str) -> String {
        let n = Neuron::new(t, content);
        store.add_neuron(&n).unwrap();
        store.upsert_state(&NeuronState::new(&n.id, 0.02)).unwrap();
        n.id
    }

    #[test]
    fn twin_fibers_merge_into_the_salient_one() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let anchor = neuron(&store, NeuronType::Entity, "alice");
        let x = neuron(&store, NeuronType::Concept, "jwt");
        let y = neuron(&store, NeuronType::Concept, "oauth");

        let strong = fiber_with_tags(&store, &anchor, &x, &["auth", "alice"], 0.9);
        let weak = fiber_with_tags(&store, &anchor, &y, &["auth", "alice"], 0.4);

        let mut ctx = RunContext::for_tests(false);
        run(&store, &config, Utc::now(), &mut ctx).unwrap();

        assert!(store.get_fiber(&weak.id).unwrap().is_none());
        let merged = store.get_fiber(&strong.id).unwrap().unwrap();
        assert_eq!(merged.neuron_ids.len(), 3);
        assert_eq!(merged.pathway[0], anchor);
        assert_eq!(merged.pathway.len(), 3);
    }

    #[test]
    fn different_anchors_never_merge() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let a1 = neuron(&store, NeuronType::Entity, "alice");
        let a2 = neuron(&store, NeuronType::Entity, "bob");
        let x = neuron(&store, NeuronType::Concept, "jwt");

        fiber_with_tags(&store, &a1, &x, &["auth"], 0.5);
        fiber_with_tags(&store, &a2, &x, &["auth"], 0.5);

        let mut ctx = RunContext::for_tests(false);
        run(&store, &config, Utc::now(), &mut ctx).unwrap();
        assert_eq!(store.count_fibers().unwrap(), 2);
    }
}
