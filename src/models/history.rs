//! Historical price series returned by the history endpoint.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Period;

/// One point of a historical series.
///
/// The server fills the bucketed-average fields for short periods and the
/// daily high/low fields for long ones; every price field is optional and
/// a missing `timestamp` deserializes to `0` so the point is discarded
/// during normalization instead of failing the whole response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub avg_high_price: Option<Decimal>,
    #[serde(default)]
    pub avg_low_price: Option<Decimal>,
    /// Daily high.
    #[serde(default)]
    pub high_price: Option<Decimal>,
    /// Daily low.
    #[serde(default)]
    pub low_price: Option<Decimal>,
    /// Raw fallback price.
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub high_price_volume: Option<i64>,
    #[serde(default)]
    pub low_price_volume: Option<i64>,
    #[serde(default)]
    pub volume: Option<i64>,
}

impl HistoricalPoint {
    /// Resolved high: bucketed average first, then daily high.
    pub fn resolved_high(&self) -> Option<Decimal> {
        self.avg_high_price.or(self.high_price)
    }

    /// Resolved low: bucketed average first, then daily low.
    pub fn resolved_low(&self) -> Option<Decimal> {
        self.avg_low_price.or(self.low_price)
    }

    /// Traded volume, summing the per-side volumes when no total is given.
    pub fn total_volume(&self) -> Option<i64> {
        match (self.volume, self.high_price_volume, self.low_price_volume) {
            (Some(total), _, _) => Some(total),
            (None, None, None) => None,
            (None, high, low) => Some(high.unwrap_or(0).saturating_add(low.unwrap_or(0))),
        }
    }
}

/// Metadata describing a history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub item_id: u32,
    pub period: Period,
    pub count: usize,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Whether the server downsampled the series.
    #[serde(default)]
    pub sampled: bool,
}

/// A full history response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub data: Vec<HistoricalPoint>,
    pub meta: HistoryMeta,
}
