//! # beacon-store
//!
//! The persistence contract the delivery subsystem writes failed batches
//! through: opaque strings by string key, last write wins.
//!
//! - [`KeyValueStore`]: the contract
//! - [`MemoryStore`]: process-local map, for tests and ephemeral hosts
//! - [`SqliteStore`]: durable single-table store surviving restarts

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod sqlite;

pub use errors::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Scoped get/set/remove of opaque strings.
///
/// Implementations must be safe to share across tasks. Writes replace any
/// previous value for the key.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<()>;
}
