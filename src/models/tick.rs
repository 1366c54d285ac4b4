//! Live price tick models from the `price-update` stream event.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::TrackerError;

/// A single observed price update for one item.
///
/// Ticks are never mutated after parsing; a newer tick supersedes an
/// older one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    pub item_id: u32,
    /// Latest instant-buy price.
    pub high: Option<Decimal>,
    /// Latest instant-sell price.
    pub low: Option<Decimal>,
    /// When `high` was observed (Unix ms).
    pub high_time: Option<i64>,
    /// When `low` was observed (Unix ms).
    pub low_time: Option<i64>,
    /// Receipt time (Unix ms).
    pub timestamp: i64,
}

impl PriceTick {
    /// Parses the JSON `data` of a `price-update` event.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Json`] if the payload is not a tick, or
    /// [`TrackerError::MalformedMessage`] if its timestamp is not positive.
    pub fn parse(payload: &str) -> crate::Result<Self> {
        let tick: PriceTick = serde_json::from_str(payload)?;
        if tick.timestamp <= 0 {
            return Err(TrackerError::MalformedMessage(format!(
                "price-update for item {} has invalid timestamp {}",
                tick.item_id, tick.timestamp
            )));
        }
        Ok(tick)
    }

    /// Returns `true` if the tick carries at least one price.
    pub fn has_price(&self) -> bool {
        self.high.is_some() || self.low.is_some()
    }
}
