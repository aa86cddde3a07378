//! SUMMARIZE: compress old, rarely accessed episodic fibers.
//!
//! An episodic fiber that is at least ninety days old and almost never
//! accessed collapses into a single summary CONCEPT neuron linked to the
//! fiber's anchor. The fiber stays retrievable but loses salience.

use chrono::{DateTime, Duration, Utc};

use super::RunContext;
use crate::core::{BrainConfig, MaturationStage, Neuron, NeuronState, NeuronType, Synapse, SynapseType};
use crate::storage::{Result, SqliteStore};

/// Minimum age before summarization.
const MIN_AGE_DAYS: i64 = 90;

/// Fibers accessed this often or more stay uncompressed.
const ACCESS_CUTOFF: u32 = 2;

pub fn run(
    store: &SqliteStore,
    _config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    let episodic = store.find_maturations_by_stage(MaturationStage::Episodic)?;

    for maturation in &episodic {
        if ctx.expired() {
            return Ok(());
        }
        let Some(mut fiber) = store.get_fiber(&maturation.fiber_id)? else {
            continue;
        };
        ctx.examined += 1;

        if now - fiber.created_at < Duration::days(MIN_AGE_DAYS) {
            continue;
        }
        if fiber.frequency >= ACCESS_CUTOFF || fiber.summary.is_empty() {
            continue;
        }
        if fiber
            .metadata
            .get("_summarized")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }

        ctx.changed += 1;
        ctx.created += 1;
        ctx.note(format!("summarized fiber {}", fiber.id));
        if ctx.dry_run {
            continue;
        }

        let mut summary_neuron = Neuron::new(NeuronType::Concept, fiber.summary.clone());
        summary_neuron.created_at = now;
        store.add_neuron(&summary_neuron)?;
        let mut state = NeuronState::new(&summary_neuron.id, 0.02);
        state.created_at = now;
        store.upsert_state(&state)?;

        let mut link = Synapse::new(
            &fiber.anchor_neuron_id,
            &summary_neuron.id,
            SynapseType::RelatedTo,
            0.5,
        );
        link.created_at = now;
        store.add_synapse(&link)?;

        fiber.metadata.insert(
            "_summarized".to_string(),
            serde_json::Value::Bool(true),
        );
        fiber.metadata.insert(
            "_summary_neuron".to_string(),
            serde_json::Value::String(summary_neuron.id.clone()),
        );
        fiber.salience = (fiber.salience * 0.8).max(0.05);
        store.update_fiber(&fiber)?;
    }

    Ok(())
}
