//! Collection endpoint settings.

use std::fmt;

use beacon_core::constants::REQUEST_TIMEOUT_MS;
use serde::{Deserialize, Serialize};

/// Endpoint used when the integrator does not configure one.
pub const MANAGED_COLLECTOR_URL: &str = "https://collect.beacon.dev/e";

/// Which backend receives the batches.
///
/// Transform hooks run only for [`Destination::Custom`]; the managed
/// backend always receives batches as built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// The hosted Beacon collector.
    #[default]
    Managed,
    /// An integrator-operated endpoint.
    Custom,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => f.write_str("managed"),
            Self::Custom => f.write_str("custom"),
        }
    }
}

/// Where and how batches are posted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorSettings {
    /// Collection endpoint URL.
    pub url: String,
    /// Backend kind.
    pub destination: Destination,
    /// Integration name; scopes the persisted queue key when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    /// Hard timeout for a reliable-path request.
    pub request_timeout_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            url: MANAGED_COLLECTOR_URL.to_string(),
            destination: Destination::Managed,
            integration: None,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_wire_names() {
        assert_eq!(serde_json::to_value(Destination::Custom).unwrap(), "custom");
        let d: Destination = serde_json::from_str("\"managed\"").unwrap();
        assert_eq!(d, Destination::Managed);
    }

    #[test]
    fn integration_omitted_when_unset() {
        let value = serde_json::to_value(CollectorSettings::default()).unwrap();
        assert!(value.get("integration").is_none());
        assert_eq!(value["requestTimeoutMs"], 10_000);
    }
}
