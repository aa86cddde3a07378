//! LEARN_HABITS: mine recurring action sequences into workflow templates.
//!
//! Action events are grouped by session and scanned with a sliding window.
//! A subsequence seen in at least three occurrences whose tag sets stay
//! consistent (Jaccard ≥ 0.5 against the first occurrence) is promoted to
//! a workflow template: a fiber of ACTION neurons chained with BEFORE
//! synapses, tagged `workflow`, surfaced by pattern queries.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::RunContext;
use crate::core::{
    BrainConfig, Fiber, Maturation, MemoryType, Neuron, NeuronState, NeuronType, Synapse,
    SynapseType,
};
use crate::storage::{ActionEvent, Result, SqliteStore};
use crate::util::jaccard;

/// Sliding window over each session's action stream.
const WINDOW: usize = 5;

/// Shortest promotable subsequence.
const MIN_SEQUENCE: usize = 2;

/// Occurrences needed for promotion.
const MIN_FREQUENCY: usize = 3;

/// Tag consistency across occurrences.
const TAG_CONSISTENCY: f64 = 0.5;

pub fn run(
    store: &SqliteStore,
    _config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    let sessions = store.action_events_by_session()?;
    ctx.examined = sessions.values().map(Vec::len).sum::<usize>() as u64;

    // sequence key -> (count, tags of first occurrence, consistent)
    let mut counts: HashMap<Vec<String>, (usize, Vec<String>, bool)> = HashMap::new();

    for events in sessions.values() {
        for window in windows_of(events, WINDOW) {
            for len in MIN_SEQUENCE..=window.len() {
                for start in 0..=(window.len() - len) {
                    let slice = &window[start..start + len];
                    let key: Vec<String> = slice.iter().map(|e| e.action.clone()).collect();
                    let tags: Vec<String> = slice
                        .iter()
                        .flat_map(|e| e.tags.iter().cloned())
                        .collect();

                    let entry = counts.entry(key).or_insert((0, Vec::new(), true));
                    if entry.0 == 0 {
                        entry.1 = tags;
                    } else if jaccard(entry.1.iter(), tags.iter()) < TAG_CONSISTENCY {
                        entry.2 = false;
                    }
                    entry.0 += 1;
                }
            }
        }
    }

    // Promote, longest sequences first so a triple wins over its pairs.
    let mut promotable: Vec<(&Vec<String>, usize)> = counts
        .iter()
        .filter(|(_, (count, _, consistent))| *count >= MIN_FREQUENCY && *consistent)
        .map(|(key, (count, _, _))| (key, *count))
        .collect();
    promotable.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(b.1.cmp(&a.1)).then(a.0.cmp(b.0)));

    let mut covered: Vec<&Vec<String>> = Vec::new();
    for (sequence, frequency) in promotable {
        if ctx.expired() {
            return Ok(());
        }
        if covered
            .iter()
            .any(|longer| is_subsequence(sequence, longer))
        {
            continue;
        }
        covered.push(sequence);

        let summary = sequence.join(" then ");
        // Already promoted in an earlier run?
        if store
            .list_fibers_by_tag("workflow")?
            .iter()
            .any(|f| f.summary == summary)
        {
            continue;
        }

        ctx.created += 1;
        ctx.note(format!("workflow template: {summary} (seen {frequency}×)"));
        if ctx.dry_run {
            continue;
        }
        promote(store, sequence, &summary, now)?;
    }

    Ok(())
}

fn windows_of(events: &[ActionEvent], size: usize) -> Vec<&[ActionEvent]> {
    if events.len() <= size {
        return vec![events];
    }
    events.windows(size).collect()
}

fn is_subsequence(needle: &[String], haystack: &[String]) -> bool {
    if needle.len() >= haystack.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|w| w == needle)
}

/// Materialize a workflow template as a fiber of chained action neurons.
fn promote(
    store: &SqliteStore,
    sequence: &[String],
    summary: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut neuron_ids: Vec<String> = Vec::new();
    let mut synapse_ids: BTreeSet<String> = BTreeSet::new();

    for action in sequence {
        let id = match store.find_neuron_by_content(NeuronType::Action, action)? {
            Some(n) => n.id,
            None => {
                let mut n = Neuron::new(NeuronType::Action, action.clone());
                n.created_at = now;
                store.add_neuron(&n)?;
                let mut state = NeuronState::new(&n.id, 0.02);
                state.created_at = now;
                store.upsert_state(&state)?;
                n.id
            }
        };
        neuron_ids.push(id);
    }

    for pair in neuron_ids.windows(2) {
        if store.get_synapse_between(&pair[0], &pair[1])?.is_none() {
            let mut synapse = Synapse::new(&pair[0], &pair[1], SynapseType::Before, 0.6);
            synapse.created_at = now;
            store.add_synapse(&synapse)?;
            synapse_ids.insert(synapse.id);
        }
    }

    let mut fiber = Fiber::create(
        neuron_ids.iter().cloned().collect(),
        synapse_ids,
        neuron_ids[0].clone(),
        neuron_ids.clone(),
        summary.to_string(),
    )
    .map_err(crate::storage::StorageError::Corrupt)?;
    fiber.created_at = now;
    fiber.salience = 0.6;
    fiber.auto_tags.insert("workflow".to_string());
    store.add_fiber(&fiber)?;
    store.save_memory_type(&fiber.id, MemoryType::Instruction)?;
    store.save_maturation(&Maturation::new(&fiber.id, now))?;
    Ok(())
}
