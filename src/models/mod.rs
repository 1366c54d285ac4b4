//! Shared models for the tracker's REST and event-stream payloads.
//!
//! Contains the chart period definitions and bucket granularities, plus
//! the wire types for ticks, price history, and the item catalog.

pub mod catalog;
pub mod chart;
pub mod history;
pub mod tick;

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Five-minute buckets.
pub const FIVE_MINUTES_MS: i64 = 5 * 60 * 1_000;
/// One-hour buckets.
pub const ONE_HOUR_MS: i64 = 60 * 60 * 1_000;
/// Six-hour buckets.
pub const SIX_HOURS_MS: i64 = 6 * ONE_HOUR_MS;
/// One-day buckets.
pub const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;

/// Every granularity a chart period can map to, finest first.
pub const GRANULARITIES: [i64; 4] = [FIVE_MINUTES_MS, ONE_HOUR_MS, SIX_HOURS_MS, ONE_DAY_MS];

/// Selectable chart periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "3d")]
    ThreeDays,
    #[serde(rename = "7d")]
    OneWeek,
    #[serde(rename = "30d")]
    OneMonth,
    #[serde(rename = "90d")]
    ThreeMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "all")]
    All,
}

impl Period {
    /// All periods, shortest first.
    pub const ALL: [Period; 9] = [
        Period::OneHour,
        Period::TwelveHours,
        Period::OneDay,
        Period::ThreeDays,
        Period::OneWeek,
        Period::OneMonth,
        Period::ThreeMonths,
        Period::OneYear,
        Period::All,
    ];

    /// Returns the wire-format name expected by the history endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::OneHour => "1h",
            Period::TwelveHours => "12h",
            Period::OneDay => "24h",
            Period::ThreeDays => "3d",
            Period::OneWeek => "7d",
            Period::OneMonth => "30d",
            Period::ThreeMonths => "90d",
            Period::OneYear => "1y",
            Period::All => "all",
        }
    }

    /// Bucket width used to display this period. Shorter periods use finer
    /// buckets.
    pub fn granularity_ms(&self) -> i64 {
        match self {
            Period::OneHour | Period::TwelveHours | Period::OneDay => FIVE_MINUTES_MS,
            Period::ThreeDays | Period::OneWeek => ONE_HOUR_MS,
            Period::OneMonth | Period::ThreeMonths => SIX_HOURS_MS,
            Period::OneYear | Period::All => ONE_DAY_MS,
        }
    }

    /// Length of the window this period covers, or `None` for `all`.
    pub fn span_ms(&self) -> Option<i64> {
        match self {
            Period::OneHour => Some(ONE_HOUR_MS),
            Period::TwelveHours => Some(12 * ONE_HOUR_MS),
            Period::OneDay => Some(ONE_DAY_MS),
            Period::ThreeDays => Some(3 * ONE_DAY_MS),
            Period::OneWeek => Some(7 * ONE_DAY_MS),
            Period::OneMonth => Some(30 * ONE_DAY_MS),
            Period::ThreeMonths => Some(90 * ONE_DAY_MS),
            Period::OneYear => Some(365 * ONE_DAY_MS),
            Period::All => None,
        }
    }
}

/// How long buckets of a granularity are retained: the longest bounded
/// period displayed at that granularity.
pub fn retention_ms(granularity_ms: i64) -> i64 {
    Period::ALL
        .iter()
        .filter(|p| p.granularity_ms() == granularity_ms)
        .filter_map(Period::span_ms)
        .max()
        .unwrap_or(365 * ONE_DAY_MS)
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = crate::TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| crate::TrackerError::Config(format!("unknown chart period {s:?}")))
    }
}

/// Floors `timestamp_ms` to the start of its bucket.
pub fn bucket_start(timestamp_ms: i64, granularity_ms: i64) -> i64 {
    if granularity_ms <= 0 {
        return timestamp_ms;
    }
    timestamp_ms - timestamp_ms.rem_euclid(granularity_ms)
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
