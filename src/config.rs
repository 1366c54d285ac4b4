//! Application configuration loaded from environment variables.
//!
//! - `GE_API_BASE_URL` - base URL of the tracker REST API (the live stream
//!   lives under `/prices/stream` relative to it)
//! - `GE_TRACKED_ITEMS` - comma-separated item ids to stream; empty streams
//!   every item
//! - `GE_STALE_AFTER_SECS` - heartbeat silence after which a connected
//!   stream is reported as stale
//!
//! Retry tuning can additionally be overridden from a JSON file with
//! [`AppConfig::load_overrides`].

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::{RetryOverrides, RetryPolicy};

/// Default REST endpoint.
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

/// Default heartbeat staleness threshold in seconds.
const DEFAULT_STALE_AFTER_SECS: u64 = 60;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub prefetch: PrefetchConfig,
}

/// REST endpoint configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
}

/// Live stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Item ids to subscribe to; empty means all items.
    pub tracked_items: Vec<u32>,
    pub stale_after: Duration,
    pub retry: RetryPolicy,
}

/// Catalog prefetch configuration.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    pub retry: RetryPolicy,
}

/// Shape of the optional JSON override file.
#[derive(Debug, Default, Deserialize)]
struct OverrideFile {
    #[serde(default)]
    reconnect: RetryOverrides,
    #[serde(default)]
    prefetch: RetryOverrides,
}

impl AppConfig {
    /// Merges retry overrides from a JSON file into this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Config`](crate::TrackerError::Config) if the
    /// file cannot be read or limits reconnect attempts (the stream always
    /// retries), or [`TrackerError::Json`](crate::TrackerError::Json) if it
    /// is not valid JSON.
    pub fn load_overrides(mut self, path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::TrackerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let overrides: OverrideFile = serde_json::from_str(&contents)?;
        if overrides.reconnect.max_attempts.is_some() {
            return Err(crate::TrackerError::Config(format!(
                "{}: reconnect.max_attempts is not supported, the price stream retries forever",
                path.display()
            )));
        }

        self.stream.retry = self.stream.retry.with_overrides(&overrides.reconnect);
        self.prefetch.retry = self.prefetch.retry.with_overrides(&overrides.prefetch);
        Ok(self)
    }
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`TrackerError::Config`](crate::TrackerError::Config) if
/// `GE_TRACKED_ITEMS` contains something other than item ids or
/// `GE_STALE_AFTER_SECS` is not a whole number of seconds.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let base_url = non_empty_var("GE_API_BASE_URL")
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string();

    let tracked_items = match non_empty_var("GE_TRACKED_ITEMS") {
        Some(raw) => parse_item_ids(&raw)?,
        None => Vec::new(),
    };

    let stale_after_secs = match non_empty_var("GE_STALE_AFTER_SECS") {
        Some(raw) => raw.parse::<u64>().map_err(|e| {
            crate::TrackerError::Config(format!("GE_STALE_AFTER_SECS is not a number: {e}"))
        })?,
        None => DEFAULT_STALE_AFTER_SECS,
    };

    Ok(AppConfig {
        api: ApiConfig { base_url },
        stream: StreamConfig {
            tracked_items,
            stale_after: Duration::from_secs(stale_after_secs),
            retry: RetryPolicy::reconnect(),
        },
        prefetch: PrefetchConfig {
            retry: RetryPolicy::prefetch(),
        },
    })
}

/// Parses a comma-separated list of item ids, ignoring blank entries.
fn parse_item_ids(raw: &str) -> crate::Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|e| {
                crate::TrackerError::Config(format!("invalid item id {s:?} in GE_TRACKED_ITEMS: {e}"))
            })
        })
        .collect()
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
