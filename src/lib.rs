//! Live price reconciliation for a Grand Exchange price tracker.
//!
//! Streams price ticks over server-sent events, consolidates them into
//! time buckets, merges them with fetched price history into chart series,
//! and prefetches the item catalog in the background.

pub mod api;
pub mod buffer;
pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod prefetch;
pub mod retry;
pub mod stream;

pub use error::{Result, TrackerError};
