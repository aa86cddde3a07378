//! Post-activation stabilization.
//!
//! After spreading, the raw score field is noisy: lateral inhibition keeps
//! the top-k winners untouched and damps everything else, then an iterative
//! settle pass subtracts a noise floor, damps globally, and enforces the
//! homeostatic activation budget until the field converges.

use std::collections::HashMap;

use crate::core::BrainConfig;

/// Maximum settle iterations.
const MAX_ROUNDS: usize = 10;

/// Noise floor as a fraction of the current maximum.
const NOISE_FLOOR_FRACTION: f64 = 0.05;

/// Global damping per round.
const DAMPING: f64 = 0.85;

/// L1 convergence threshold between rounds.
const CONVERGENCE_EPSILON: f64 = 1e-3;

/// Scores are considered extinguished below this.
const EXTINCT: f64 = 1e-6;

/// Outcome of a stabilization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizationReport {
    pub rounds: usize,
    pub converged: bool,
    /// Sum of scores after the pass (≤ the configured budget).
    pub total: f64,
}

/// Lateral inhibition: the top `k` scores stay untouched, all others are
/// scaled by `factor`. Ties at the boundary resolve by id so reruns on
/// equal input keep a stable order.
pub fn lateral_inhibition(scores: &mut HashMap<String, f64>, k: usize, factor: f64) {
    if scores.len() <= k {
        return;
    }
    let mut ranked: Vec<(String, f64)> = scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    for (id, _) in ranked.into_iter().skip(k) {
        if let Some(score) = scores.get_mut(&id) {
            *score *= factor;
        }
    }
}

/// Iterative settle: noise-floor subtraction, damping, homeostatic budget
/// normalization. Stops on L1 convergence or when the field is extinct.
pub fn stabilize(scores: &mut HashMap<String, f64>, config: &BrainConfig) -> StabilizationReport {
    let budget = config.stabilization_budget;
    let mut rounds = 0;
    let mut converged = false;

    for _ in 0..MAX_ROUNDS {
        rounds += 1;
        let before: HashMap<String, f64> = scores.clone();

        let max = scores.values().cloned().fold(0.0, f64::max);
        if max < EXTINCT {
            scores.clear();
            converged = true;
            break;
        }

        let floor = max * NOISE_FLOOR_FRACTION;
        for score in scores.values_mut() {
            *score = (*score - floor).max(0.0) * DAMPING;
        }
        scores.retain(|_, s| *s > EXTINCT);

        let total: f64 = scores.values().sum();
        if total > budget {
            let scale = budget / total;
            for score in scores.values_mut() {
                *score *= scale;
            }
        }

        let l1: f64 = scores
            .iter()
            .map(|(id, s)| (s - before.get(id).copied().unwrap_or(0.0)).abs())
            .chain(
                before
                    .iter()
                    .filter(|(id, _)| !scores.contains_key(*id))
                    .map(|(_, s)| s.abs()),
            )
            .sum();
        if l1 < CONVERGENCE_EPSILON {
            converged = true;
            break;
        }
    }

    StabilizationReport {
        rounds,
        converged,
        total: scores.values().sum(),
    }
}
