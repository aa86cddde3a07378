//! Freshness levels: coarse age buckets used by conflict auto-resolution
//! and the health report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Age bucket of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessLevel {
    /// Under a week old.
    Fresh,
    /// Under a month.
    Aging,
    /// Under three months.
    Stale,
    /// Three months or older.
    Ancient,
}

impl FreshnessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessLevel::Fresh => "fresh",
            FreshnessLevel::Aging => "aging",
            FreshnessLevel::Stale => "stale",
            FreshnessLevel::Ancient => "ancient",
        }
    }
}

/// Evaluated freshness of one timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freshness {
    pub level: FreshnessLevel,
    pub age_days: i64,
}

/// Bucket `created_at` relative to `now`.
pub fn evaluate_freshness(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
    let age_days = (now - created_at).num_days().max(0);
    let level = match age_days {
        0..=6 => FreshnessLevel::Fresh,
        7..=29 => FreshnessLevel::Aging,
        30..=89 => FreshnessLevel::Stale,
        _ => FreshnessLevel::Ancient,
    };
    Freshness { level, age_days }
}
