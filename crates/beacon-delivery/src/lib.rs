//! # beacon-delivery
//!
//! Turns batches into durable network deliveries.
//!
//! - [`transform`]: integrator `beforeSend` / `beforeBatch` hooks, fail-open
//! - [`transport`]: reliable ([`EventTransport`]) and best-effort
//!   ([`BeaconTransport`]) channels plus the wire envelope
//! - [`classify`]: permanent vs transient failures, throttled diagnostics
//! - [`retry`]: bounded exponential backoff state
//! - [`persistence`]: crash-recovery records in a [`KeyValueStore`](beacon_store::KeyValueStore)
//! - [`sender`]: [`EventSender`], which ties the above together
//! - [`mock`]: scripted transports for tests

#![deny(unsafe_code)]

pub mod classify;
pub mod errors;
pub mod mock;
pub mod persistence;
pub mod retry;
pub mod sender;
pub mod transform;
pub mod transport;

pub use classify::{FailureClass, classify_status};
pub use errors::{TransformError, TransportError};
pub use persistence::{PersistedQueue, storage_key};
pub use retry::{RetryPolicy, RetrySnapshot};
pub use sender::{DeliveryOutcome, EventSender, EventSenderBuilder, SendCallbacks, SenderConfig};
pub use transform::{TransformHook, TransformResult, Transformer, TransformerRegistry};
pub use transport::{BeaconTransport, EventTransport, HttpBeacon, HttpTransport, NoBeacon};
