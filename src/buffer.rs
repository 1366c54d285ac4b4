//! Live tick buffer: per-item tips and time-bucketed aggregates.
//!
//! [`LiveTickBuffer`] is a plain data structure with no locking. It is
//! shared through [`SharedTickBuffer`], whose single writer task applies
//! ticks received over a channel so that concurrent stream connections
//! never mutate the buffer directly. Readers take snapshots and are
//! notified of every applied write through a `watch` revision counter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, trace};

use crate::models::tick::PriceTick;
use crate::models::{GRANULARITIES, bucket_start, now_unix_ms, retention_ms};

/// The most recent tick for an item. It belongs to the still-open bucket.
pub type LiveTip = PriceTick;

/// A fixed-width time window of aggregated ticks for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedBucket {
    pub item_id: u32,
    /// Always a multiple of `granularity_ms`.
    pub bucket_start_time: i64,
    pub granularity_ms: i64,
    /// Last known high inside the window.
    pub high: Option<Decimal>,
    /// Last known low inside the window.
    pub low: Option<Decimal>,
}

impl ConsolidatedBucket {
    /// Returns `true` once the window has fully elapsed at `now_ms`.
    pub fn is_complete(&self, now_ms: i64) -> bool {
        self.bucket_start_time + self.granularity_ms <= now_ms
    }

    /// Overwrites whichever side the tick carries.
    fn absorb(&mut self, tick: &PriceTick) {
        if tick.high.is_some() {
            self.high = tick.high;
        }
        if tick.low.is_some() {
            self.low = tick.low;
        }
    }
}

/// Why a tick did not reach a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tip and at least one bucket updated.
    Consolidated,
    /// Tip updated; the tick had no price to aggregate.
    TipOnly,
    /// Tip updated; every bucket the tick maps to is past retention.
    TooOld,
}

/// Read-only view of one item at one granularity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub tip: Option<LiveTip>,
    /// Finalized buckets, oldest first.
    pub buckets: Vec<ConsolidatedBucket>,
}

#[derive(Debug, Default)]
struct ItemSeries {
    tip: Option<LiveTip>,
    // granularity -> bucket start -> bucket
    buckets: HashMap<i64, BTreeMap<i64, ConsolidatedBucket>>,
}

/// Consolidates an unbounded tick stream into a bounded set of buckets.
#[derive(Debug)]
pub struct LiveTickBuffer {
    granularities: Vec<i64>,
    items: HashMap<u32, ItemSeries>,
}

impl Default for LiveTickBuffer {
    fn default() -> Self {
        Self::new(&GRANULARITIES)
    }
}

impl LiveTickBuffer {
    /// Creates a buffer that consolidates at each of the given widths.
    /// Non-positive widths are ignored.
    #[must_use]
    pub fn new(granularities: &[i64]) -> Self {
        let mut granularities: Vec<i64> = granularities.iter().copied().filter(|g| *g > 0).collect();
        granularities.sort_unstable();
        granularities.dedup();
        Self {
            granularities,
            items: HashMap::new(),
        }
    }

    /// Bucket widths this buffer consolidates at.
    pub fn granularities(&self) -> &[i64] {
        &self.granularities
    }

    /// Records a tick as the item's tip and folds it into its buckets.
    ///
    /// Buckets older than the retention window of their granularity are
    /// evicted, and ticks that would land in such a bucket are not
    /// aggregated.
    pub fn record_tick(&mut self, tick: PriceTick, now_ms: i64) -> TickOutcome {
        let series = self.items.entry(tick.item_id).or_default();

        let outcome = if !tick.has_price() {
            TickOutcome::TipOnly
        } else {
            let mut consolidated = false;
            for &granularity in &self.granularities {
                let cutoff = bucket_start(now_ms - retention_ms(granularity), granularity);
                let buckets = series.buckets.entry(granularity).or_default();

                // Keep only buckets starting at or after the cutoff.
                if buckets.first_key_value().is_some_and(|(start, _)| *start < cutoff) {
                    *buckets = buckets.split_off(&cutoff);
                }

                let start = bucket_start(tick.timestamp, granularity);
                if start < cutoff {
                    continue;
                }

                buckets
                    .entry(start)
                    .or_insert_with(|| ConsolidatedBucket {
                        item_id: tick.item_id,
                        bucket_start_time: start,
                        granularity_ms: granularity,
                        high: None,
                        low: None,
                    })
                    .absorb(&tick);
                consolidated = true;
            }

            if consolidated {
                TickOutcome::Consolidated
            } else {
                debug!(
                    item_id = tick.item_id,
                    timestamp = tick.timestamp,
                    "Dropped tick older than bucket retention"
                );
                TickOutcome::TooOld
            }
        };

        series.tip = Some(tick);
        outcome
    }

    /// Returns the current tip for an item.
    pub fn live_tip(&self, item_id: u32) -> Option<&LiveTip> {
        self.items.get(&item_id).and_then(|s| s.tip.as_ref())
    }

    /// Returns the finalized buckets for an item, oldest first.
    ///
    /// The bucket containing `now_ms` is still receiving ticks and is never
    /// returned, nor is anything after it.
    pub fn consolidated_buckets(
        &self,
        item_id: u32,
        granularity_ms: i64,
        now_ms: i64,
    ) -> Vec<ConsolidatedBucket> {
        let open_start = bucket_start(now_ms, granularity_ms);
        self.items
            .get(&item_id)
            .and_then(|s| s.buckets.get(&granularity_ms))
            .map(|buckets| buckets.range(..open_start).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the tip and finalized buckets for an item in one view.
    pub fn snapshot(&self, item_id: u32, granularity_ms: i64, now_ms: i64) -> BufferSnapshot {
        BufferSnapshot {
            tip: self.live_tip(item_id).cloned(),
            buckets: self.consolidated_buckets(item_id, granularity_ms, now_ms),
        }
    }

    /// Total buckets held for an item across all granularities, including
    /// the open one.
    pub fn bucket_count(&self, item_id: u32) -> usize {
        self.items
            .get(&item_id)
            .map(|s| s.buckets.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    /// Item ids that have received at least one tick.
    pub fn item_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.items.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Sending half of the buffer's write channel.
///
/// Cloned into every stream connection; the buffer's writer task is the
/// only code that applies ticks.
#[derive(Debug, Clone)]
pub struct TickSink {
    tx: mpsc::UnboundedSender<PriceTick>,
}

impl TickSink {
    /// Queues a tick for the writer. Returns `false` once the writer is gone.
    pub fn send(&self, tick: PriceTick) -> bool {
        self.tx.send(tick).is_ok()
    }
}

/// A [`LiveTickBuffer`] shared between one writer task and many readers.
#[derive(Debug, Clone)]
pub struct SharedTickBuffer {
    inner: Arc<RwLock<LiveTickBuffer>>,
    revision: watch::Receiver<u64>,
}

impl SharedTickBuffer {
    /// Spawns the writer task and returns the shared handle and its sink.
    ///
    /// The writer exits once every [`TickSink`] clone has been dropped.
    /// Must be called from within a Tokio runtime.
    pub fn spawn(buffer: LiveTickBuffer) -> (Self, TickSink) {
        let inner = Arc::new(RwLock::new(buffer));
        let (revision_tx, revision_rx) = watch::channel(0_u64);
        let (tx, mut rx) = mpsc::unbounded_channel::<PriceTick>();

        let writer = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(tick) = rx.recv().await {
                let item_id = tick.item_id;
                let outcome = {
                    let mut guard = writer.write().await;
                    guard.record_tick(tick, now_unix_ms())
                };
                trace!(item_id, ?outcome, "Applied tick");
                revision_tx.send_modify(|r| *r = r.wrapping_add(1));
            }
            debug!("Tick buffer writer stopped");
        });

        (
            Self {
                inner,
                revision: revision_rx,
            },
            TickSink { tx },
        )
    }

    /// Returns a receiver that changes after every applied tick.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Snapshot of one item at one granularity as of `now_ms`.
    pub async fn snapshot_at(&self, item_id: u32, granularity_ms: i64, now_ms: i64) -> BufferSnapshot {
        self.inner.read().await.snapshot(item_id, granularity_ms, now_ms)
    }

    /// Snapshot of one item at one granularity as of the wall clock.
    pub async fn snapshot(&self, item_id: u32, granularity_ms: i64) -> BufferSnapshot {
        self.snapshot_at(item_id, granularity_ms, now_unix_ms()).await
    }

    /// Current tip for an item.
    pub async fn live_tip(&self, item_id: u32) -> Option<LiveTip> {
        self.inner.read().await.live_tip(item_id).cloned()
    }
}
