//! # beacon
//!
//! Client-side telemetry SDK.
//!
//! [`Tracker`] owns the in-memory event queue, flushes it on an interval
//! through the reliable sender, and replays batches a previous run left in
//! the store. Settings come from `~/.beacon/settings.json` plus `BEACON_*`
//! environment overrides.
//!
//! ```no_run
//! # async fn demo() -> beacon::Result<()> {
//! use beacon::{EventPayload, SharedContext, Tracker};
//!
//! let settings = beacon::load_settings()?;
//! beacon::init_logging(&settings);
//! let store = beacon::open_store(&settings)?;
//! let tracker = Tracker::new(settings, store, SharedContext::default())?;
//! tracker.start().await;
//! let _ = tracker.track(EventPayload::custom("signup", None));
//! let _ = tracker.flush().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod tracker;

pub use errors::{Result, TrackerError};
pub use tracker::{STORE_NAMESPACE, Tracker, TrackerBuilder, open_store};

pub use beacon_core::{Batch, EventId, EventPayload, EventRecord, EventType, UserId};
pub use beacon_delivery::{DeliveryOutcome, TransformError, TransformHook};
pub use beacon_queue::{SessionContext, SharedContext};
pub use beacon_settings::{BeaconSettings, Destination};

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    Ok(beacon_settings::load_settings()?)
}

/// Install the global `tracing` subscriber at the configured level.
///
/// `RUST_LOG` wins when set. Safe to call more than once.
pub fn init_logging(settings: &BeaconSettings) {
    beacon_core::logging::init_subscriber(&settings.diagnostics.log_level);
}
