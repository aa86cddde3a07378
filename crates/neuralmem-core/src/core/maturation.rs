//! Maturation: per-fiber memory stage.
//!
//! Fibers climb STM → Working → Episodic → Semantic. The final transition
//! implements the spacing effect: age alone is not enough, the fiber must
//! have been reinforced on several distinct calendar days.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// STAGE
// ============================================================================

/// Memory consolidation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaturationStage {
    /// Short-term memory, minutes old. Decays fastest.
    #[default]
    Stm,
    /// Working memory, survived the first half hour with reinforcement.
    Working,
    /// Episodic memory, hours to days old.
    Episodic,
    /// Semantic memory, consolidated knowledge. Decays slowest.
    Semantic,
}

impl MaturationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaturationStage::Stm => "stm",
            MaturationStage::Working => "working",
            MaturationStage::Episodic => "episodic",
            MaturationStage::Semantic => "semantic",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stm" => MaturationStage::Stm,
            "working" => MaturationStage::Working,
            "episodic" => MaturationStage::Episodic,
            "semantic" => MaturationStage::Semantic,
            _ => MaturationStage::Stm,
        }
    }

    /// Decay-rate multiplier applied to member neurons at this stage.
    #[inline]
    pub fn decay_multiplier(&self) -> f64 {
        match self {
            MaturationStage::Stm => 5.0,
            MaturationStage::Working => 2.0,
            MaturationStage::Episodic => 1.0,
            MaturationStage::Semantic => 0.3,
        }
    }
}

impl std::fmt::Display for MaturationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MATURATION RECORD
// ============================================================================

/// Per-fiber maturation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Maturation {
    pub fiber_id: String,
    pub stage: MaturationStage,
    /// Total reinforcements across all days.
    pub reinforcement_count: u32,
    /// Distinct calendar days on which the fiber was reinforced.
    pub reinforcement_days: BTreeSet<NaiveDate>,
    /// When the current stage was entered.
    pub stage_entered_at: DateTime<Utc>,
    /// When the fiber itself was created (drives the semantic age gate).
    pub created_at: DateTime<Utc>,
}

impl Maturation {
    /// Fresh STM record for a newly encoded fiber.
    pub fn new(fiber_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            fiber_id: fiber_id.into(),
            stage: MaturationStage::Stm,
            reinforcement_count: 0,
            reinforcement_days: BTreeSet::new(),
            stage_entered_at: now,
            created_at: now,
        }
    }

    /// Record a reinforcement event at `now`.
    pub fn reinforce(&mut self, now: DateTime<Utc>) {
        self.reinforcement_count = self.reinforcement_count.saturating_add(1);
        self.reinforcement_days.insert(now.date_naive());
    }

    /// Stage gates:
    /// - STM → Working: ≥ 30 min in stage and ≥ 1 reinforcement.
    /// - Working → Episodic: ≥ 4 h in stage.
    /// - Episodic → Semantic: fiber age ≥ 7 d and reinforcement on ≥ 3
    ///   distinct calendar days (spacing effect).
    ///
    /// Returns the next stage and the instant the gate opened, so a single
    /// maintenance run that is days late still walks through intermediate
    /// stages with faithful entry times.
    fn next_stage(&self, now: DateTime<Utc>) -> Option<(MaturationStage, DateTime<Utc>)> {
        let in_stage = now - self.stage_entered_at;
        let age = now - self.created_at;
        match self.stage {
            MaturationStage::Stm => {
                (in_stage >= chrono::Duration::minutes(30) && self.reinforcement_count >= 1)
                    .then_some((
                        MaturationStage::Working,
                        self.stage_entered_at + chrono::Duration::minutes(30),
                    ))
            }
            MaturationStage::Working => (in_stage >= chrono::Duration::hours(4)).then_some((
                MaturationStage::Episodic,
                self.stage_entered_at + chrono::Duration::hours(4),
            )),
            MaturationStage::Episodic => {
                (age >= chrono::Duration::days(7) && self.reinforcement_days.len() >= 3)
                    .then_some((MaturationStage::Semantic, now))
            }
            MaturationStage::Semantic => None,
        }
    }

    /// Apply every transition currently due. Returns the number applied.
    pub fn advance(&mut self, now: DateTime<Utc>) -> u32 {
        let mut transitions = 0;
        while let Some((next, entered_at)) = self.next_stage(now) {
            self.stage = next;
            self.stage_entered_at = entered_at.min(now);
            transitions += 1;
        }
        transitions
    }
}

// ============================================================================
// TESTS
// ============================================================================
