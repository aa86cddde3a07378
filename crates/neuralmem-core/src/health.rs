//! Brain health report.
//!
//! Composite quality grade computed from store aggregates: connectivity
//! (orphan neurons drag it down), vitality (average activation), integrity
//! (disputed claims), and consolidation hygiene (stage distribution, run
//! recency). The purity score is the weighted blend on a 0–100 scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{Result, SqliteStore};

/// Component subscores, each 0–100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    /// Share of neurons wired into the graph.
    pub connectivity: f64,
    /// Average activation kept alive by use and reinforcement.
    pub vitality: f64,
    /// Freedom from unresolved contradictions.
    pub integrity: f64,
    /// Maturation progress and consolidation recency.
    pub consolidation: f64,
}

/// Full health report for one brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Letter grade A–F.
    pub grade: char,
    /// Composite quality score, 0–100.
    pub purity: f64,
    pub components: HealthComponents,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub neurons: u64,
    pub synapses: u64,
    pub fibers: u64,
}

/// Component weights in the purity blend.
const W_CONNECTIVITY: f64 = 0.3;
const W_VITALITY: f64 = 0.25;
const W_INTEGRITY: f64 = 0.25;
const W_CONSOLIDATION: f64 = 0.2;

/// Compute the health report as of `now`.
pub fn health_report(store: &SqliteStore, now: DateTime<Utc>) -> Result<HealthReport> {
    let stats = store.stats()?;
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    // An empty brain is trivially healthy.
    if stats.neurons == 0 {
        return Ok(HealthReport {
            grade: 'A',
            purity: 100.0,
            components: HealthComponents {
                connectivity: 100.0,
                vitality: 100.0,
                integrity: 100.0,
                consolidation: 100.0,
            },
            warnings,
            recommendations: vec!["Brain is empty. Encode something.".to_string()],
            neurons: 0,
            synapses: 0,
            fibers: 0,
        });
    }

    // Connectivity: synapse density against a 2-per-neuron target.
    let density = stats.synapses as f64 / stats.neurons as f64;
    let connectivity = (density / 2.0 * 100.0).min(100.0);
    if connectivity < 40.0 {
        warnings.push("Graph is sparsely connected.".to_string());
        recommendations.push("Run INFER and ENRICH consolidation to grow structure.".to_string());
    }

    // Vitality: average activation against a 0.4 healthy mean.
    let vitality = (stats.avg_activation / 0.4 * 100.0).min(100.0);
    if vitality < 30.0 {
        warnings.push("Most memories have decayed to low activation.".to_string());
        recommendations.push("Query the brain more, or prune dead weight.".to_string());
    }

    // Integrity: unresolved disputes reduce trust.
    let disputed_ratio = stats.disputed_neurons as f64 / stats.neurons as f64;
    let integrity = ((1.0 - disputed_ratio * 5.0) * 100.0).clamp(0.0, 100.0);
    if stats.disputed_neurons > 0 {
        warnings.push(format!(
            "{} neurons carry unresolved disputes.",
            stats.disputed_neurons
        ));
        recommendations.push("Review contradicting memories and supersede the losers.".to_string());
    }

    // Consolidation: recent runs plus stage spread beyond STM.
    let last_run = store.last_consolidation()?;
    let recency = match last_run {
        Some(at) => {
            let days = (now - at).num_days();
            if days <= 1 {
                100.0
            } else if days <= 7 {
                70.0
            } else {
                30.0
            }
        }
        None => 20.0,
    };
    let total_staged: u64 = stats.stage_counts.values().sum();
    let beyond_stm: u64 = stats
        .stage_counts
        .iter()
        .filter(|(stage, _)| stage.as_str() != "stm")
        .map(|(_, n)| *n)
        .sum();
    let progression = if total_staged == 0 {
        50.0
    } else {
        beyond_stm as f64 / total_staged as f64 * 100.0
    };
    let consolidation = (recency + progression) / 2.0;
    if last_run.is_none() {
        recommendations.push("No consolidation has ever run. Schedule MATURE and PRUNE.".to_string());
    }

    let purity = connectivity * W_CONNECTIVITY
        + vitality * W_VITALITY
        + integrity * W_INTEGRITY
        + consolidation * W_CONSOLIDATION;

    let grade = match purity {
        p if p >= 90.0 => 'A',
        p if p >= 75.0 => 'B',
        p if p >= 60.0 => 'C',
        p if p >= 45.0 => 'D',
        p if p >= 30.0 => 'E',
        _ => 'F',
    };

    Ok(HealthReport {
        grade,
        purity,
        components: HealthComponents {
            connectivity,
            vitality,
            integrity,
            consolidation,
        },
        warnings,
        recommendations,
        neurons: stats.neurons,
        synapses: stats.synapses,
        fibers: stats.fibers,
    })
}
