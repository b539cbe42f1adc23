//! Tracker error types.

use beacon_delivery::TransportError;
use beacon_settings::SettingsError;
use beacon_store::StoreError;
use thiserror::Error;

/// Errors raised while wiring a [`Tracker`](crate::Tracker).
///
/// Delivery failures never surface here; they are absorbed by the sender.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Settings failed to load or validate.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The persistent store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An HTTP client could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for tracker setup.
pub type Result<T> = std::result::Result<T, TrackerError>;
