//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `BEACON_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BeaconSettings, Destination, MAX_RETRIES_LIMIT};

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BeaconSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value
/// stays in effect.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    // ── Collector ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("BEACON_COLLECTOR_URL") {
        settings.collector.url = v;
    }
    if let Some(v) = read_env_string("BEACON_DESTINATION") {
        match parse_destination(&v) {
            Some(d) => settings.collector.destination = d,
            None => warn!(key = "BEACON_DESTINATION", value = %v, "invalid destination env var, ignoring"),
        }
    }
    if let Some(v) = read_env_string("BEACON_INTEGRATION") {
        settings.collector.integration = Some(v);
    }
    if let Some(v) = read_env_u64("BEACON_REQUEST_TIMEOUT_MS", 100, 120_000) {
        settings.collector.request_timeout_ms = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("BEACON_MAX_RETRIES", 0, u64::from(MAX_RETRIES_LIMIT)) {
        settings.retry.max_retries = v as u32;
    }
    if let Some(v) = read_env_u64("BEACON_RETRY_BASE_DELAY_MS", 10, 60_000) {
        settings.retry.base_delay_ms = v;
    }

    // ── Queue ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("BEACON_FLUSH_INTERVAL_MS", 100, 3_600_000) {
        settings.queue.flush_interval_ms = v;
    }
    if let Some(v) = read_env_usize("BEACON_MAX_QUEUE_LENGTH", 1, 10_000) {
        settings.queue.max_length = v;
    }

    // ── Persistence / diagnostics ───────────────────────────────────
    if let Some(v) = read_env_string("BEACON_DATABASE_PATH") {
        settings.persistence.database_path = Some(v);
    }
    if let Some(v) = read_env_string("BEACON_LOG_LEVEL") {
        settings.diagnostics.log_level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a destination name (case-insensitive).
pub fn parse_destination(val: &str) -> Option<Destination> {
    match val.to_lowercase().as_str() {
        "managed" => Some(Destination::Managed),
        "custom" => Some(Destination::Custom),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"collector": {"url": "a", "requestTimeoutMs": 10}});
        let source = serde_json::json!({"collector": {"url": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["collector"]["url"], "b");
        assert_eq!(merged["collector"]["requestTimeoutMs"], 10);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"globalMetadata": {"app": "shop"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["globalMetadata"]["app"], "shop");
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/beacon/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = BeaconSettings::default();
        assert_eq!(settings.retry, defaults.retry);
        assert_eq!(settings.queue, defaults.queue);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"collector": {"destination": "custom", "integration": "shop"}, "retry": {"maxRetries": 5}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.collector.destination, Destination::Custom);
        assert_eq!(settings.collector.integration.as_deref(), Some("shop"));
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.base_delay_ms, 1_000);
    }

    #[test]
    fn load_global_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"globalMetadata": {"release": "1.4.2"}}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        let metadata = settings.global_metadata.unwrap();
        assert_eq!(metadata["release"], "1.4.2");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_destination_variants() {
        assert_eq!(parse_destination("Custom"), Some(Destination::Custom));
        assert_eq!(parse_destination("MANAGED"), Some(Destination::Managed));
        assert_eq!(parse_destination("other"), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("5000", 100, 120_000), Some(5_000));
        assert_eq!(parse_u64_range("99", 100, 120_000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("1", 1, 10_000), Some(1));
        assert_eq!(parse_usize_range("0", 1, 10_000), None);
        assert_eq!(parse_usize_range("10001", 1, 10_000), None);
    }
}
