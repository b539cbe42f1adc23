//! Package-level constants and delivery defaults.

/// SDK version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header identifying Beacon traffic on the reliable transport.
pub const CLIENT_HEADER: &str = "x-beacon-client";

/// Maximum number of automatic retries after a transient failure.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound on a single backoff delay in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Hard timeout for a reliable-path request in milliseconds.
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Persisted batches older than this are discarded on recovery (24h).
pub const PERSISTED_BATCH_EXPIRY_MS: i64 = 24 * 60 * 60 * 1_000;

/// Window during which repeated permanent errors with the same status are not re-logged.
pub const PERMANENT_ERROR_LOG_THROTTLE_MS: i64 = 60_000;

/// Periodic flush interval in milliseconds.
pub const FLUSH_INTERVAL_MS: u64 = 10_000;

/// Maximum number of events held in the in-memory queue.
pub const MAX_QUEUE_LENGTH: usize = 100;

/// Prefix of the persisted queue storage key.
pub const QUEUE_KEY_PREFIX: &str = "queue";

/// Payload ceiling browsers enforce for beacon requests.
pub const BEACON_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3);
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn expiry_is_one_day() {
        assert_eq!(PERSISTED_BATCH_EXPIRY_MS, 86_400_000);
    }
}
