//! Chart-facing series types produced by the merger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One point of a merged chart series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDataPoint {
    pub timestamp: i64,
    pub high_price: Option<Decimal>,
    pub low_price: Option<Decimal>,
    pub mid_price: Decimal,
    /// Mid price of the preceding point, used for per-point trend colouring.
    pub previous_price: Option<Decimal>,
    pub price: Option<Decimal>,
    pub volume: Option<i64>,
    /// Sourced from the live tip rather than history or a closed bucket.
    pub is_live: bool,
}

impl ChartDataPoint {
    /// The value statistics are computed from: mid price, or the raw price
    /// when the mid price is zero.
    pub fn stat_value(&self) -> Option<Decimal> {
        if self.mid_price > Decimal::ZERO {
            Some(self.mid_price)
        } else {
            self.price.filter(|p| *p > Decimal::ZERO)
        }
    }
}

/// Direction of the series from first to last value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

/// Summary over a merged series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartStats {
    pub first: Decimal,
    pub last: Decimal,
    pub min: Decimal,
    pub max: Decimal,
    pub change: Decimal,
    /// Percent change from `first` to `last`, rounded to two places.
    pub change_percent: Decimal,
    pub trend: Trend,
}
