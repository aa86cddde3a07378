//! MATURE: advance maturation stages and extract patterns.

use chrono::{DateTime, Utc};

use super::RunContext;
use crate::core::BrainConfig;
use crate::lifecycle::patterns::extract_patterns;
use crate::storage::{Result, SqliteStore};

pub fn run(
    store: &SqliteStore,
    _config: &BrainConfig,
    now: DateTime<Utc>,
    ctx: &mut RunContext,
) -> Result<()> {
    for mut maturation in store.all_maturations()? {
        if ctx.expired() {
            return Ok(());
        }
        ctx.examined += 1;
        let transitions = maturation.advance(now);
        if transitions == 0 {
            continue;
        }
        ctx.changed += 1;
        ctx.note(format!(
            "fiber {} advanced to {}",
            maturation.fiber_id, maturation.stage
        ));
        if !ctx.dry_run {
            store.save_maturation(&maturation)?;
        }
    }

    if ctx.expired() {
        return Ok(());
    }
    let patterns = extract_patterns(store, now, ctx.dry_run)?;
    ctx.created += patterns.concepts_created as u64 + patterns.synapses_created as u64;
    if patterns.concepts_created > 0 {
        ctx.note(format!(
            "pattern extraction created {} concepts from {} clusters",
            patterns.concepts_created, patterns.clusters_found
        ));
    }

    Ok(())
}
