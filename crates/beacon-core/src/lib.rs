//! # beacon-core
//!
//! Shared vocabulary for the Beacon telemetry SDK.
//!
//! - **Branded IDs**: [`EventId`], [`SessionId`], [`UserId`] as newtypes
//! - **Events**: [`EventRecord`] with a flattened, internally tagged [`EventPayload`]
//! - **Batches**: [`Batch`] (wire unit) and [`PersistedBatch`] (crash-recovery unit)
//! - **Clock**: [`Clock`] abstraction so timestamps and expiry are testable
//! - **Logging**: `tracing` subscriber setup and capture helpers for tests

#![deny(unsafe_code)]

pub mod batch;
pub mod clock;
pub mod constants;
pub mod events;
pub mod ids;
pub mod logging;

pub use batch::{Batch, DeviceType, GlobalMetadata, PersistedBatch};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{
    ClickData, CustomEventData, ErrorData, ErrorKind, EventPayload, EventRecord, EventType,
    PageViewData, ScrollData, ScrollDirection, SessionEndReason, Utm, WebVitalKind,
    WebVitalsData,
};
pub use ids::{EventId, SessionId, UserId};
