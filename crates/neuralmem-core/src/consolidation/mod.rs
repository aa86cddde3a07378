//! Consolidation: offline maintenance strategies.
//!
//! Each strategy runs in dry-run or commit mode, respects an optional
//! duration budget (aborting at the next safe boundary), and returns a
//! report. Committed runs are recorded in the store's consolidation
//! history.

pub mod dream;
pub mod enrich;
pub mod habits;
pub mod infer;
pub mod mature;
pub mod merge;
pub mod prune;
pub mod summarize;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::BrainConfig;
use crate::storage::{Result, SqliteStore};

/// Available consolidation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Remove decayed neurons and dead synapses.
    Prune,
    /// Merge near-duplicate fibers.
    Merge,
    /// Compress old episodic fibers into summary neurons.
    Summarize,
    /// Advance maturation stages and extract patterns.
    Mature,
    /// Turn repeated co-activation into synapses.
    Infer,
    /// Transitive causal closure and cross-cluster links.
    Enrich,
    /// Random replay that discovers weak speculative links.
    Dream,
    /// Mine action sequences into workflow templates.
    LearnHabits,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Prune => "prune",
            Strategy::Merge => "merge",
            Strategy::Summarize => "summarize",
            Strategy::Mature => "mature",
            Strategy::Infer => "infer",
            Strategy::Enrich => "enrich",
            Strategy::Dream => "dream",
            Strategy::LearnHabits => "learn_habits",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prune" => Some(Strategy::Prune),
            "merge" => Some(Strategy::Merge),
            "summarize" => Some(Strategy::Summarize),
            "mature" => Some(Strategy::Mature),
            "infer" => Some(Strategy::Infer),
            "enrich" => Some(Strategy::Enrich),
            "dream" => Some(Strategy::Dream),
            "learn_habits" | "habits" => Some(Strategy::LearnHabits),
            _ => None,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one consolidation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub strategy: Strategy,
    pub dry_run: bool,
    pub items_examined: u64,
    pub items_changed: u64,
    pub created: u64,
    pub removed: u64,
    /// Human-readable notes about what happened.
    pub details: Vec<String>,
    pub duration_ms: u64,
    /// True when the duration budget expired before completion.
    pub aborted: bool,
}

/// Shared run state passed into every strategy.
pub struct RunContext {
    pub dry_run: bool,
    deadline: Option<Instant>,
    pub examined: u64,
    pub changed: u64,
    pub created: u64,
    pub removed: u64,
    pub details: Vec<String>,
    pub aborted: bool,
}

impl RunContext {
    fn new(dry_run: bool, max_duration: Option<Duration>) -> Self {
        Self {
            dry_run,
            deadline: max_duration.map(|d| Instant::now() + d),
            examined: 0,
            changed: 0,
            created: 0,
            removed: 0,
            details: Vec::new(),
            aborted: false,
        }
    }

    /// Check the duration budget. Once it returns true the strategy must
    /// stop at the next safe boundary.
    pub fn expired(&mut self) -> bool {
        if self.aborted {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.aborted = true;
                return true;
            }
        }
        false
    }

    pub fn note(&mut self, detail: impl Into<String>) {
        if self.details.len() < 100 {
            self.details.push(detail.into());
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(dry_run: bool) -> Self {
        Self::new(dry_run, None)
    }
}

/// Dispatch one strategy.
pub fn consolidate(
    store: &SqliteStore,
    config: &BrainConfig,
    strategy: Strategy,
    dry_run: bool,
    max_duration: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<ConsolidationReport> {
    let started = Instant::now();
    let mut ctx = RunContext::new(dry_run, max_duration);

    match strategy {
        Strategy::Prune => prune::run(store, config, now, &mut ctx)?,
        Strategy::Merge => merge::run(store, config, now, &mut ctx)?,
        Strategy::Summarize => summarize::run(store, config, now, &mut ctx)?,
        Strategy::Mature => mature::run(store, config, now, &mut ctx)?,
        Strategy::Infer => infer::run(store, config, now, &mut ctx)?,
        Strategy::Enrich => enrich::run(store, config, now, &mut ctx)?,
        Strategy::Dream => dream::run(store, config, now, &mut ctx)?,
        Strategy::LearnHabits => habits::run(store, config, now, &mut ctx)?,
    }

    let report = ConsolidationReport {
        strategy,
        dry_run,
        items_examined: ctx.examined,
        items_changed: ctx.changed,
        created: ctx.created,
        removed: ctx.removed,
        details: ctx.details,
        duration_ms: started.elapsed().as_millis() as u64,
        aborted: ctx.aborted,
    };

    if !dry_run {
        store.record_consolidation(
            strategy.as_str(),
            dry_run,
            report.duration_ms,
            report.items_examined,
            report.items_changed,
            &report.details,
        )?;
    }
    tracing::info!(
        strategy = %strategy,
        examined = report.items_examined,
        changed = report.items_changed,
        aborted = report.aborted,
        dry_run,
        "consolidation run complete"
    );
    Ok(report)
}
