//! Retry, queue, persistence and diagnostics settings.

use beacon_core::constants::{
    FLUSH_INTERVAL_MS, MAX_QUEUE_LENGTH, MAX_RETRIES, PERMANENT_ERROR_LOG_THROTTLE_MS,
    PERSISTED_BATCH_EXPIRY_MS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS,
};
use serde::{Deserialize, Serialize};

/// Bounded exponential backoff after transient failures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay_ms: RETRY_BASE_DELAY_MS,
            max_delay_ms: RETRY_MAX_DELAY_MS,
        }
    }
}

/// In-memory event queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Events held before the oldest is evicted.
    pub max_length: usize,
    /// Periodic flush interval.
    pub flush_interval_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_length: MAX_QUEUE_LENGTH,
            flush_interval_ms: FLUSH_INTERVAL_MS,
        }
    }
}

/// Crash-recovery persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceSettings {
    /// Persisted batches older than this are discarded on recovery.
    pub expiry_ms: i64,
    /// SQLite file for the durable store. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            expiry_ms: PERSISTED_BATCH_EXPIRY_MS,
            database_path: None,
        }
    }
}

/// Logging behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsSettings {
    /// Window in which a repeated permanent-error status is not logged again.
    pub permanent_error_throttle_ms: i64,
    /// Default filter for [`beacon_core::logging::init_subscriber`].
    pub log_level: String,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            permanent_error_throttle_ms: PERMANENT_ERROR_LOG_THROTTLE_MS,
            log_level: "warn".to_string(),
        }
    }
}
