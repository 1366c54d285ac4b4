//! Merges historical points with live buffer state into one chart series.
//!
//! The output is strictly increasing in timestamp. When two sources claim
//! the same millisecond the historical point wins over the live tip, and
//! the live tip wins over a closed bucket.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::api::ApiClient;
use crate::buffer::{BufferSnapshot, ConsolidatedBucket, LiveTickBuffer, LiveTip, SharedTickBuffer};
use crate::models::Period;
use crate::models::chart::{ChartDataPoint, ChartStats, Trend};
use crate::models::history::HistoricalPoint;
use crate::models::now_unix_ms;

/// A merged series and its summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedChart {
    pub data: Vec<ChartDataPoint>,
    /// `None` when no point has a positive price.
    pub stats: Option<ChartStats>,
}

impl MergedChart {
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }
}

/// Tie-break order on equal timestamps; lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Source {
    History,
    Live,
    Bucket,
}

fn mid_price(high: Option<Decimal>, low: Option<Decimal>, fallback: Option<Decimal>) -> Decimal {
    match (high, low) {
        (Some(h), Some(l)) => match h.checked_add(l) {
            Some(sum) => sum / Decimal::TWO,
            None => h / Decimal::TWO + l / Decimal::TWO,
        },
        (Some(h), None) => h,
        (None, Some(l)) => l,
        (None, None) => fallback.unwrap_or(Decimal::ZERO),
    }
}

fn point(
    timestamp: i64,
    high: Option<Decimal>,
    low: Option<Decimal>,
    price: Option<Decimal>,
    volume: Option<i64>,
    is_live: bool,
) -> ChartDataPoint {
    ChartDataPoint {
        timestamp,
        high_price: high,
        low_price: low,
        mid_price: mid_price(high, low, price),
        previous_price: None,
        price,
        volume,
        is_live,
    }
}

fn from_history(p: &HistoricalPoint) -> Option<ChartDataPoint> {
    let high = p.resolved_high();
    let low = p.resolved_low();
    if p.timestamp <= 0 || (high.is_none() && low.is_none() && p.price.is_none()) {
        return None;
    }
    Some(point(p.timestamp, high, low, p.price, p.total_volume(), false))
}

fn from_bucket(b: &ConsolidatedBucket) -> ChartDataPoint {
    point(b.bucket_start_time, b.high, b.low, None, None, false)
}

fn from_tip(tip: &LiveTip) -> ChartDataPoint {
    point(tip.timestamp, tip.high, tip.low, None, None, true)
}

/// Resolves prices for historical points, drops unusable ones, and sorts
/// the rest by timestamp.
pub fn normalize_history(points: &[HistoricalPoint]) -> Vec<ChartDataPoint> {
    let mut normalized: Vec<ChartDataPoint> = points.iter().filter_map(from_history).collect();
    normalized.sort_by_key(|p| p.timestamp);
    link_previous(&mut normalized);
    normalized
}

fn link_previous(points: &mut [ChartDataPoint]) {
    let mut previous = None;
    for p in points.iter_mut() {
        p.previous_price = previous;
        previous = Some(p.mid_price);
    }
}

/// Merges a historical series with a snapshot of the live buffer.
///
/// `snapshot` must already be taken at the granularity of the displayed
/// period; its buckets exclude the open window.
pub fn merge_chart_data(history: &[HistoricalPoint], snapshot: &BufferSnapshot) -> MergedChart {
    let mut tagged: Vec<(Source, ChartDataPoint)> = normalize_history(history)
        .into_iter()
        .map(|p| (Source::History, p))
        .chain(snapshot.buckets.iter().map(|b| (Source::Bucket, from_bucket(b))))
        .chain(snapshot.tip.iter().map(|t| (Source::Live, from_tip(t))))
        .collect();

    tagged.sort_by_key(|(source, p)| (p.timestamp, *source));
    tagged.dedup_by_key(|(_, p)| p.timestamp);

    let mut data: Vec<ChartDataPoint> = tagged.into_iter().map(|(_, p)| p).collect();
    link_previous(&mut data);
    let stats = compute_stats(&data);

    MergedChart { data, stats }
}

/// Summarizes a series from its positive values.
pub fn compute_stats(data: &[ChartDataPoint]) -> Option<ChartStats> {
    let mut values = data.iter().filter_map(ChartDataPoint::stat_value);
    let first = values.next()?;

    let (mut last, mut min, mut max) = (first, first, first);
    for value in values {
        last = value;
        min = min.min(value);
        max = max.max(value);
    }

    let change = last - first;
    let change_percent = change
        .checked_div(first)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|percent| percent.round_dp(2))
        .unwrap_or(if change.is_sign_negative() { Decimal::MIN } else { Decimal::MAX });
    let trend = if change > Decimal::ZERO {
        Trend::Up
    } else if change < Decimal::ZERO {
        Trend::Down
    } else {
        Trend::Flat
    };

    Some(ChartStats {
        first,
        last,
        min,
        max,
        change,
        change_percent,
        trend,
    })
}

/// A chart for one item and period: fetched history plus whatever the live
/// buffer holds, re-merged on demand.
#[derive(Debug, Clone)]
pub struct ChartView {
    pub item_id: u32,
    pub period: Period,
    history: Vec<HistoricalPoint>,
}

impl ChartView {
    pub fn new(item_id: u32, period: Period, history: Vec<HistoricalPoint>) -> Self {
        Self {
            item_id,
            period,
            history,
        }
    }

    /// Fetches history for the item and period.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`](crate::TrackerError) if the request fails.
    pub async fn load(client: &ApiClient, item_id: u32, period: Period) -> crate::Result<Self> {
        let history = client.fetch_price_history(item_id, period, None).await?;
        Ok(Self::new(item_id, period, history.data))
    }

    /// Merges against a buffer as of `now_ms`.
    pub fn render(&self, buffer: &LiveTickBuffer, now_ms: i64) -> MergedChart {
        let snapshot = buffer.snapshot(self.item_id, self.period.granularity_ms(), now_ms);
        merge_chart_data(&self.history, &snapshot)
    }

    /// Merges against a shared buffer as of the wall clock.
    pub async fn render_shared(&self, buffer: &SharedTickBuffer) -> MergedChart {
        let snapshot = buffer
            .snapshot_at(self.item_id, self.period.granularity_ms(), now_unix_ms())
            .await;
        merge_chart_data(&self.history, &snapshot)
    }
}
