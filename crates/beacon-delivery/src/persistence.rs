//! Crash-recovery storage of failed batches.
//!
//! One record per user scope, last write wins. Store failures are logged
//! and absorbed; delivery never fails because persistence did.

use std::sync::Arc;

use beacon_core::constants::QUEUE_KEY_PREFIX;
use beacon_core::{Batch, PersistedBatch, UserId};
use beacon_store::KeyValueStore;
use tracing::{debug, warn};

/// Storage key for a user's persisted batch.
///
/// `queue:<userId>`, or `queue:<userId>:<integration>` when an integration
/// name is configured.
#[must_use]
pub fn storage_key(user_id: &UserId, integration: Option<&str>) -> String {
    match integration.filter(|i| !i.is_empty()) {
        Some(integration) => format!("{QUEUE_KEY_PREFIX}:{user_id}:{integration}"),
        None => format!("{QUEUE_KEY_PREFIX}:{user_id}"),
    }
}

/// Read/write access to persisted batches over a [`KeyValueStore`].
#[derive(Clone)]
pub struct PersistedQueue {
    store: Arc<dyn KeyValueStore>,
}

impl PersistedQueue {
    /// Wrap a store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write `batch` under `key` with persistence time `persisted_at`.
    ///
    /// Returns whether the write succeeded.
    pub fn save(&self, key: &str, batch: &Batch, persisted_at: i64) -> bool {
        let record = PersistedBatch::new(batch, persisted_at);
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "failed to encode batch for persistence");
                return false;
            }
        };
        match self.store.set_item(key, &json) {
            Ok(()) => {
                metrics::counter!("beacon_batches_persisted_total").increment(1);
                debug!(key, events = batch.len(), persisted_at, "batch persisted for recovery");
                true
            }
            Err(e) => {
                warn!(key, error = %e, "failed to persist batch");
                false
            }
        }
    }

    /// Read the record under `key`.
    ///
    /// An unparseable record is removed and reported as absent.
    pub fn load(&self, key: &str) -> Option<PersistedBatch> {
        let raw = match self.store.get_item(key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "failed to read persisted batch");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable persisted batch");
                self.clear(key);
                None
            }
        }
    }

    /// Remove the record under `key`.
    pub fn clear(&self, key: &str) {
        if let Err(e) = self.store.remove_item(key) {
            warn!(key, error = %e, "failed to clear persisted batch");
        }
    }
}

impl std::fmt::Debug for PersistedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{DeviceType, EventId, EventPayload, EventRecord, SessionId};
    use beacon_store::{MemoryStore, Result as StoreResult, StoreError};

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Rejected("unavailable".into()))
        }
        fn set_item(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Err(StoreError::Rejected("quota exceeded".into()))
        }
        fn remove_item(&self, _key: &str) -> StoreResult<()> {
            Err(StoreError::Rejected("unavailable".into()))
        }
    }

    fn batch() -> Batch {
        Batch {
            user_id: UserId::from("u1"),
            session_id: SessionId::from("s1"),
            device: DeviceType::Desktop,
            events: vec![EventRecord {
                id: EventId::from("e1"),
                timestamp: 3,
                page_url: "https://a.test/".into(),
                payload: EventPayload::custom("ping", None),
            }],
            global_metadata: None,
        }
    }

    #[test]
    fn key_scoping() {
        let user = UserId::from("anon-1");
        assert_eq!(storage_key(&user, None), "queue:anon-1");
        assert_eq!(storage_key(&user, Some("")), "queue:anon-1");
        assert_eq!(storage_key(&user, Some("shop")), "queue:anon-1:shop");
    }

    #[test]
    fn save_load_clear() {
        let store = Arc::new(MemoryStore::new());
        let queue = PersistedQueue::new(store.clone());
        assert!(queue.save("queue:u1", &batch(), 1_000));

        let record = queue.load("queue:u1").unwrap();
        assert_eq!(record.persisted_at, 1_000);
        assert_eq!(record.into_batch(), batch());

        queue.clear("queue:u1");
        assert!(store.is_empty());
        assert!(queue.load("queue:u1").is_none());
    }

    #[test]
    fn unreadable_record_is_removed() {
        let store = Arc::new(MemoryStore::new());
        store.set_item("queue:u1", "{not json").unwrap();
        let queue = PersistedQueue::new(store.clone());
        assert!(queue.load("queue:u1").is_none());
        assert!(store.get_item("queue:u1").unwrap().is_none());
    }

    #[test]
    fn store_failures_are_absorbed() {
        let queue = PersistedQueue::new(Arc::new(FailingStore));
        assert!(!queue.save("k", &batch(), 1));
        assert!(queue.load("k").is_none());
        queue.clear("k");
    }
}
