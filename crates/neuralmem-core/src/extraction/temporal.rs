//! Temporal phrase extraction.
//!
//! Recognizes relative ("yesterday", "last Tuesday", "3 days ago") and
//! absolute ("2026-08-01", "at 3pm") time expressions in English and
//! Vietnamese, normalized to UTC ranges against a caller-supplied reference
//! time so results stay deterministic.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A recognized time expression normalized to a UTC range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeHint {
    /// The matched phrase as written.
    pub phrase: String,
    /// Start of the normalized range (inclusive).
    pub start: DateTime<Utc>,
    /// End of the normalized range (inclusive).
    pub end: DateTime<Utc>,
    /// Extraction confidence.
    pub confidence: f64,
}

static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").unwrap());
static AGO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+)\s+(minute|hour|day|week|month)s?\s+ago\b").unwrap());
static WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(last|next|this)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .unwrap()
});

fn day_range(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    (start, start + Duration::days(1) - Duration::seconds(1))
}

fn weekday_from_name(name: &str) -> Weekday {
    match name.to_lowercase().as_str() {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// Extract time expressions relative to `reference`.
///
/// Never fails: unparseable input yields an empty list.
pub fn extract_time_hints(text: &str, reference: DateTime<Utc>) -> Vec<TimeHint> {
    let mut hints = Vec::new();
    let today = reference.date_naive();

    // Whole-day relative words, English and Vietnamese.
    let day_words: [(&str, i64, f64); 8] = [
        ("yesterday", -1, 0.9),
        ("today", 0, 0.9),
        ("tomorrow", 1, 0.9),
        ("hôm qua", -1, 0.9),
        ("hôm nay", 0, 0.9),
        ("ngày mai", 1, 0.9),
        ("tối qua", -1, 0.8),
        ("sáng nay", 0, 0.8),
    ];
    let lower = text.to_lowercase();
    for (word, offset, confidence) in day_words {
        if lower.contains(word) {
            let (start, end) = day_range(today + Duration::days(offset));
            hints.push(TimeHint {
                phrase: word.to_string(),
                start,
                end,
                confidence,
            });
        }
    }

    // "last week" / "tuần trước", "last month" / "tháng trước".
    for (word, days) in [
        ("last week", 7i64),
        ("tuần trước", 7),
        ("last month", 30),
        ("tháng trước", 30),
    ] {
        if lower.contains(word) {
            let (start, _) = day_range(today - Duration::days(days));
            let (_, end) = day_range(today - Duration::days(1));
            hints.push(TimeHint {
                phrase: word.to_string(),
                start,
                end,
                confidence: 0.7,
            });
        }
    }

    // "last/next/this <weekday>".
    for cap in WEEKDAY_RE.captures_iter(text) {
        let target = weekday_from_name(&cap[2]);
        let today_num = today.weekday().num_days_from_monday() as i64;
        let target_num = target.num_days_from_monday() as i64;
        let offset = match cap[1].to_lowercase().as_str() {
            "last" => {
                let d = (today_num - target_num).rem_euclid(7);
                -(if d == 0 { 7 } else { d })
            }
            "next" => {
                let d = (target_num - today_num).rem_euclid(7);
                if d == 0 {
                    7
                } else {
                    d
                }
            }
            _ => target_num - today_num,
        };
        let (start, end) = day_range(today + Duration::days(offset));
        hints.push(TimeHint {
            phrase: cap[0].to_string(),
            start,
            end,
            confidence: 0.85,
        });
    }

    // "N units ago".
    for cap in AGO_RE.captures_iter(text) {
        let n: i64 = match cap[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        let duration = match cap[2].to_lowercase().as_str() {
            "minute" => Duration::minutes(n),
            "hour" => Duration::hours(n),
            "day" => Duration::days(n),
            "week" => Duration::weeks(n),
            _ => Duration::days(30 * n),
        };
        let point = reference - duration;
        hints.push(TimeHint {
            phrase: cap[0].to_string(),
            start: point - Duration::hours(1),
            end: point + Duration::hours(1),
            confidence: 0.8,
        });
    }

    // Absolute ISO dates.
    for cap in ISO_DATE_RE.captures_iter(text) {
        let (y, m, d) = (
            cap[1].parse().unwrap_or(0),
            cap[2].parse().unwrap_or(0),
            cap[3].parse().unwrap_or(0),
        );
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            let (start, end) = day_range(date);
            hints.push(TimeHint {
                phrase: cap[0].to_string(),
                start,
                end,
                confidence: 0.95,
            });
        }
    }

    // Clock times resolve onto the reference day (or the day another hint
    // already selected, when present).
    for cap in CLOCK_RE.captures_iter(text) {
        let hour: u32 = match cap[1].parse() {
            Ok(h) if h <= 23 => h,
            _ => continue,
        };
        let minute: u32 = cap
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let hour = match cap.get(3).map(|m| m.as_str().to_lowercase()) {
            Some(ref ampm) if ampm == "pm" && hour < 12 => hour + 12,
            Some(ref ampm) if ampm == "am" && hour == 12 => 0,
            _ => hour,
        };
        let base_day = hints.first().map(|h| h.start.date_naive()).unwrap_or(today);
        if let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) {
            let point = Utc.from_utc_datetime(&base_day.and_time(time));
            hints.push(TimeHint {
                phrase: cap[0].to_string(),
                start: point,
                end: point + Duration::hours(1) - Duration::seconds(1),
                confidence: 0.85,
            });
        }
    }

    hints
}
