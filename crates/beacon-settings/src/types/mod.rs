//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file deserializes with compiled defaults for missing fields.

mod collector;
mod delivery;

pub use collector::{CollectorSettings, Destination, MANAGED_COLLECTOR_URL};
pub use delivery::{DiagnosticsSettings, PersistenceSettings, QueueSettings, RetrySettings};

use beacon_core::GlobalMetadata;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upper bound accepted for `retry.maxRetries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Collection endpoint.
    pub collector: CollectorSettings,
    /// Retry/backoff.
    pub retry: RetrySettings,
    /// In-memory queue.
    pub queue: QueueSettings,
    /// Crash-recovery persistence.
    pub persistence: PersistenceSettings,
    /// Logging behavior.
    pub diagnostics: DiagnosticsSettings,
    /// Metadata attached to every batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_metadata: Option<GlobalMetadata>,
}

impl BeaconSettings {
    /// Reject settings the delivery subsystem cannot run with.
    pub fn validate(&self) -> Result<()> {
        let url = self.collector.url.trim();
        if url.is_empty() {
            return Err(SettingsError::InvalidValue("collector.url is empty".into()));
        }
        if let Err(e) = url::Url::parse(url) {
            return Err(SettingsError::InvalidValue(format!(
                "collector.url {url:?} is not a valid URL: {e}"
            )));
        }
        if self.collector.request_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "collector.requestTimeoutMs must be positive".into(),
            ));
        }
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            return Err(SettingsError::InvalidValue(format!(
                "retry.maxRetries {} exceeds {MAX_RETRIES_LIMIT}",
                self.retry.max_retries
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SettingsError::InvalidValue(
                "retry.baseDelayMs exceeds retry.maxDelayMs".into(),
            ));
        }
        if self.queue.max_length == 0 {
            return Err(SettingsError::InvalidValue(
                "queue.maxLength must be positive".into(),
            ));
        }
        if self.queue.flush_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "queue.flushIntervalMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = BeaconSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.retry.base_delay_ms, 1_000);
        assert_eq!(settings.queue.max_length, 100);
        assert_eq!(settings.persistence.expiry_ms, 86_400_000);
        assert_eq!(settings.diagnostics.permanent_error_throttle_ms, 60_000);
        assert!(settings.global_metadata.is_none());
    }

    #[test]
    fn rejects_empty_url() {
        let mut settings = BeaconSettings::default();
        settings.collector.url = "  ".into();
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn rejects_unparseable_url() {
        let mut settings = BeaconSettings::default();
        settings.collector.url = "not a url".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut settings = BeaconSettings::default();
        settings.collector.request_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_too_many_retries() {
        let mut settings = BeaconSettings::default();
        settings.retry.max_retries = 11;
        assert!(settings.validate().is_err());
        settings.retry.max_retries = 10;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut settings = BeaconSettings::default();
        settings.retry.base_delay_ms = 60_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_bounds() {
        let mut settings = BeaconSettings::default();
        settings.queue.flush_interval_ms = 0;
        assert!(settings.validate().is_err());
        settings.queue.flush_interval_ms = 50;
        settings.queue.max_length = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: BeaconSettings =
            serde_json::from_str(r#"{"collector": {"destination": "custom"}}"#).unwrap();
        assert_eq!(settings.collector.destination, Destination::Custom);
        assert_eq!(settings.collector.url, MANAGED_COLLECTOR_URL);
        assert_eq!(settings.queue.flush_interval_ms, 10_000);
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(BeaconSettings::default()).unwrap();
        assert_eq!(value["retry"]["maxRetries"], 3);
        assert_eq!(value["queue"]["flushIntervalMs"], 10_000);
        assert_eq!(value["diagnostics"]["logLevel"], "warn");
        assert!(value.get("globalMetadata").is_none());
    }
}
