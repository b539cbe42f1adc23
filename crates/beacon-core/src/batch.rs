//! Batches: the unit of transmission and of crash recovery.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::EventRecord;
use crate::ids::{SessionId, UserId};

/// Integrator-supplied metadata attached to every batch.
pub type GlobalMetadata = Map<String, Value>;

/// Device class reported with each batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Desktop or laptop.
    Desktop,
    /// Phone.
    Mobile,
    /// Tablet.
    Tablet,
    /// Could not be detected.
    #[default]
    Unknown,
}

/// Ordered, deduplicated events plus routing context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// User the events belong to.
    pub user_id: UserId,
    /// Session the events were captured in.
    pub session_id: SessionId,
    /// Device class.
    pub device: DeviceType,
    /// Events sorted ascending by timestamp.
    pub events: Vec<EventRecord>,
    /// Present only when configured and non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_metadata: Option<GlobalMetadata>,
}

impl Batch {
    /// Number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the batch carries no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A [`Batch`] stored for recovery after a failed or best-effort send.
///
/// Serialized as `{ userId, sessionId, device, events, global_metadata?, timestamp }`
/// where `timestamp` is the persistence time. Missing fields default so a
/// damaged record still parses and can be judged (and discarded) by the
/// recovery path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedBatch {
    /// User scope the record was written for.
    pub user_id: UserId,
    /// Session of the original batch.
    pub session_id: SessionId,
    /// Device class of the original batch.
    #[serde(default)]
    pub device: DeviceType,
    /// Events of the original (pre-transform) batch.
    #[serde(default)]
    pub events: Vec<EventRecord>,
    /// Global metadata of the original batch.
    #[serde(
        rename = "global_metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub global_metadata: Option<GlobalMetadata>,
    /// Persistence time in epoch milliseconds.
    #[serde(rename = "timestamp", default)]
    pub persisted_at: i64,
}

impl PersistedBatch {
    /// Wrap a batch with its persistence time.
    #[must_use]
    pub fn new(batch: &Batch, persisted_at: i64) -> Self {
        Self {
            user_id: batch.user_id.clone(),
            session_id: batch.session_id.clone(),
            device: batch.device,
            events: batch.events.clone(),
            global_metadata: batch.global_metadata.clone(),
            persisted_at,
        }
    }

    /// Whether the record may still be delivered at `now_ms`.
    ///
    /// Empty records, records without a positive persistence time, and records
    /// older than `expiry_ms` are never resurrected.
    #[must_use]
    pub fn is_recoverable(&self, now_ms: i64, expiry_ms: i64) -> bool {
        !self.events.is_empty()
            && self.persisted_at > 0
            && now_ms.saturating_sub(self.persisted_at) <= expiry_ms
    }

    /// Rebuild the batch for another delivery attempt.
    #[must_use]
    pub fn into_batch(self) -> Batch {
        Batch {
            user_id: self.user_id,
            session_id: self.session_id,
            device: self.device,
            events: self.events,
            global_metadata: self.global_metadata,
        }
    }
}
