//! Failure taxonomy and throttled permanent-error diagnostics.

use std::fmt;

use crate::errors::TransportError;

/// How a failed delivery attempt is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The collector rejected the request (4xx). Never retried or persisted.
    Permanent,
    /// Network failure, timeout, or server error. Persisted and retried.
    Transient,
}

impl FailureClass {
    /// Metric label for this class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Transient => "transient",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an HTTP status. `None` means the batch was accepted.
///
/// 4xx is permanent. Everything else that is not 2xx (5xx, and the
/// unexpected 1xx/3xx) is transient.
#[must_use]
pub fn classify_status(status: u16) -> Option<FailureClass> {
    match status {
        200..=299 => None,
        400..=499 => Some(FailureClass::Permanent),
        _ => Some(FailureClass::Transient),
    }
}

/// Classify a request that produced no status.
#[must_use]
pub fn classify_transport_error(err: &TransportError) -> FailureClass {
    match err {
        TransportError::Timeout | TransportError::Network(_) => FailureClass::Transient,
        TransportError::Encode(_) => FailureClass::Permanent,
    }
}

/// Last permanent-error diagnostic that was emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermanentErrorLog {
    /// HTTP status that was logged.
    pub status: u16,
    /// When it was logged, epoch milliseconds.
    pub at_ms: i64,
}

/// Decide whether a permanent error with `status` should be logged now.
///
/// Repeats of the logged status inside `window_ms` are suppressed. A
/// different status, or the same one after the window, is logged and
/// becomes the new reference.
pub fn should_log_permanent(
    last: &mut Option<PermanentErrorLog>,
    status: u16,
    now_ms: i64,
    window_ms: i64,
) -> bool {
    if let Some(prev) = last {
        if prev.status == status && now_ms.saturating_sub(prev.at_ms) < window_ms {
            return false;
        }
    }
    *last = Some(PermanentErrorLog {
        status,
        at_ms: now_ms,
    });
    true
}
