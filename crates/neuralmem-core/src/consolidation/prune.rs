//! PRUNE: remove decayed neurons and dead synapses.
//!
//! A neuron is prunable when its activation fell below the prune threshold,
//! unless it sits in a high-salience fiber or is a hub (eight or more
//! inbound synapses). Synapses die when their weight is negligible and
//! they were never reinforced. Fibers shed pruned members; a fiber is only
//! removed when it has no members left and none of its synapses earned
//! durable reinforcement.

use chrono::{DateTime, Utc};

use super::RunContext;
use crate::core::BrainConfig;
use crate::storage::{Result, SqliteStore};

/// Inbound degree at which a neuron counts as a hub.
const HUB_INBOUND: u64 = 8;

/// Salience at which a fiber protects its members.
const PROTECTIVE_SALIENCE: f64 = 0.8;

/// Synapses below this weight with zero reinforcements are dead.
const DEAD_SYNAPSE_WEIGHT: f64 = 0.05;

const PAGE: u64 = 500;

pub fn run(
    store: &SqliteStore,
    config: &BrainConfig,
    _now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    // Pass 1: prunable neurons.
    let mut pruned_neurons: Vec<String> = Vec::new();
    let mut offset = 0u64;
    'states: loop {
        let states = store.all_states(offset, PAGE)?;
        if states.is_empty() {
            break;
        }
        offset += states.len() as u64;

        for state in &states {
            if ctx.expired() {
                break 'states;
            }
            ctx.examined += 1;
            if state.activation_level >= config.prune_threshold {
                continue;
            }
            if store.incoming_count(&state.neuron_id)? >= HUB_INBOUND {
                continue;
            }
            let holding = store.find_fibers_containing_any(&[state.neuron_id.clone()])?;
            if holding.iter().any(|f| f.salience >= PROTECTIVE_SALIENCE) {
                continue;
            }
            // Durably reinforced organic synapses protect their endpoints;
            // deleting the neuron would cascade the synapse away and orphan
            // the fiber it anchors.
            let touching = store.synapses_for_neurons(&[state.neuron_id.clone()])?;
            if touching
                .iter()
                .any(|s| !s.is_inferred() && s.reinforced_count >= 2)
            {
                continue;
            }

            pruned_neurons.push(state.neuron_id.clone());
            if !ctx.dry_run {
                store.delete_neuron(&state.neuron_id)?;
            }
            ctx.removed += 1;
        }
    }
    if !pruned_neurons.is_empty() {
        ctx.note(format!("pruned {} decayed neurons", pruned_neurons.len()));
    }

    // Pass 2: dead synapses.
    let mut offset = 0u64;
    let mut dead_synapses = 0u64;
    'synapses: loop {
        let synapses = store.all_synapses(offset, PAGE)?;
        if synapses.is_empty() {
            break;
        }
        offset += synapses.len() as u64;

        for synapse in &synapses {
            if ctx.expired() {
                break 'synapses;
            }
            ctx.examined += 1;
            if synapse.weight < DEAD_SYNAPSE_WEIGHT && synapse.reinforced_count == 0 {
                if !ctx.dry_run {
                    store.delete_synapse(&synapse.id)?;
                }
                dead_synapses += 1;
                ctx.removed += 1;
            }
        }
    }
    if dead_synapses > 0 {
        ctx.note(format!("removed {dead_synapses} dead synapses"));
    }

    // Pass 3: shed pruned members from fibers; drop only fully emptied
    // fibers with no durably reinforced synapse left.
    if !ctx.dry_run && !pruned_neurons.is_empty() {
        let mut offset = 0u64;
        loop {
            let fibers = store.all_fibers(offset, PAGE)?;
            if fibers.is_empty() {
                break;
            }
            offset += fibers.len() as u64;

            for mut fiber in fibers {
                let before = fiber.neuron_ids.len();
                fiber
                    .neuron_ids
                    .retain(|id| !pruned_neurons.contains(id));
                if fiber.neuron_ids.len() == before {
                    continue;
                }
                let surviving = fiber.neuron_ids.clone();
                fiber.pathway.retain(|id| surviving.contains(id));

                if fiber.neuron_ids.is_empty() {
                    let mut protected = false;
                    for synapse_id in &fiber.synapse_ids {
                        if let Some(s) = store.get_synapse(synapse_id)? {
                            if !s.is_inferred() && s.reinforced_count >= 2 {
                                protected = true;
                                break;
                            }
                        }
                    }
                    if !protected {
                        store.delete_fiber(&fiber.id)?;
                        ctx.removed += 1;
                        continue;
                    }
                }

                if !fiber.neuron_ids.contains(&fiber.anchor_neuron_id) {
                    if let Some(first) = fiber.pathway.first().cloned().or_else(|| {
                        fiber.neuron_ids.iter().next().cloned()
                    }) {
                        fiber.anchor_neuron_id = first;
                    }
                }
                store.update_fiber(&fiber)?;
                ctx.changed += 1;
            }
        }
    }

    Ok(())
}
