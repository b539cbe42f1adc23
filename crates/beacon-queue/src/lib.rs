//! # beacon-queue
//!
//! Producer side of the delivery subsystem.
//!
//! - [`SessionContext`] / [`SharedContext`]: user, session, device and
//!   location supplied by the session lifecycle owner
//! - [`BatchBuilder`]: accepts events from capture handlers and produces
//!   ordered, deduplicated [`Batch`](beacon_core::Batch)es on demand
//!
//! The builder owns no timer; flush triggers live in the tracker.

#![deny(unsafe_code)]

pub mod builder;
pub mod context;
pub mod utm;

pub use builder::{BatchBuilder, BatchSnapshot, BuilderConfig};
pub use context::{SessionContext, SharedContext};
pub use utm::parse_utm;
