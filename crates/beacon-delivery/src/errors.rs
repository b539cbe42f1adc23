//! Delivery error types.

use thiserror::Error;

/// Failure of a single reliable-path request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request exceeded its hard timeout and was aborted.
    #[error("request timed out")]
    Timeout,
    /// Connection, DNS or TLS failure.
    #[error("network error: {0}")]
    Network(String),
    /// The batch could not be encoded as JSON.
    #[error("failed to encode batch: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Errors raised by the transform pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    /// A hook name did not match any known hook.
    #[error("unknown transform hook: {0}")]
    UnknownHook(String),
    /// A registered hook reported a failure.
    #[error("transform hook failed: {0}")]
    Hook(String),
}
