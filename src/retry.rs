//! Capped exponential backoff shared by the stream reconnect loop and the
//! catalog prefetcher.

use std::time::Duration;

use serde::Deserialize;

/// Base delay for stream reconnects.
pub const RECONNECT_BASE: Duration = Duration::from_millis(1_000);

/// Upper bound for stream reconnect delays.
pub const RECONNECT_CAP: Duration = Duration::from_millis(30_000);

/// Base delay between catalog page attempts.
pub const PREFETCH_BASE: Duration = Duration::from_millis(1_000);

/// Attempts per catalog page before the page counts as failed.
pub const PREFETCH_ATTEMPTS: u32 = 3;

/// Delay schedule for retrying a failing operation.
///
/// The delay before retry `n` (0-indexed) is `min(base * 2^n, cap)`.
/// `max_attempts` of `None` means the caller retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Unbounded policy used for the live price stream.
    #[must_use]
    pub fn reconnect() -> Self {
        Self {
            base: RECONNECT_BASE,
            cap: RECONNECT_CAP,
            max_attempts: None,
        }
    }

    /// Bounded policy used for each catalog page (1s, 2s, 4s, ...).
    #[must_use]
    pub fn prefetch() -> Self {
        Self {
            base: PREFETCH_BASE,
            cap: Duration::from_millis(4_000),
            max_attempts: Some(PREFETCH_ATTEMPTS),
        }
    }

    /// Returns the delay to wait before retry number `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^31 * any realistic base already exceeds every sane cap.
        let factor = 1_u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Returns `true` if another attempt may follow `attempts_made` failures.
    #[must_use]
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }

    /// Applies optional millisecond overrides from a config file.
    pub(crate) fn with_overrides(mut self, overrides: &RetryOverrides) -> Self {
        if let Some(base_ms) = overrides.base_ms {
            self.base = Duration::from_millis(base_ms);
        }
        if let Some(cap_ms) = overrides.cap_ms {
            self.cap = Duration::from_millis(cap_ms);
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = Some(max_attempts);
        }
        self
    }
}

/// Partial retry tuning read from an override file. Missing fields keep the
/// built-in values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryOverrides {
    pub base_ms: Option<u64>,
    pub cap_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}
