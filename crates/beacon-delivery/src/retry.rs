//! Retry/backoff state.
//!
//! A sender owns one [`RetryState`]. At most one retry is scheduled at a
//! time; the handle lives in a one-slot field so `stop()` can abort it, and
//! a generation counter keeps a timer that already woke up from acting after
//! a stop.

use std::time::Duration;

use beacon_core::constants::{MAX_RETRIES, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};
use beacon_settings::RetrySettings;
use tokio::task::JoinHandle;

use crate::classify::PermanentErrorLog;

/// Bounded exponential backoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `retry_count` completed retries:
    /// `base * 2^retry_count`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Mutable retry bookkeeping, guarded by the sender's mutex.
#[derive(Debug, Default)]
pub(crate) struct RetryState {
    pub is_retrying: bool,
    pub retry_count: u32,
    pub scheduled: Option<JoinHandle<()>>,
    pub generation: u64,
    pub last_permanent_error: Option<PermanentErrorLog>,
}

impl RetryState {
    /// Back to idle. Drops (does not abort) the slot, since the caller may
    /// be the scheduled task itself.
    pub fn reset(&mut self) {
        self.is_retrying = false;
        self.retry_count = 0;
        self.scheduled = None;
    }

    /// Cancel any pending retry and invalidate timers already running.
    pub fn stop(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.scheduled.take() {
            handle.abort();
        }
        self.is_retrying = false;
        self.retry_count = 0;
    }
}

/// Point-in-time view of a sender's retry machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetrySnapshot {
    /// A retry chain is in progress.
    pub is_retrying: bool,
    /// Retries fired in the current chain.
    pub retry_count: u32,
    /// A retry timer is pending.
    pub has_scheduled_retry: bool,
    /// Retries scheduled over the sender's lifetime.
    pub retries_scheduled_total: u64,
}
