//! Event queue and batch construction.
//!
//! Capture handlers call [`BatchBuilder::track`] with a bare payload; the
//! builder stamps id, time and location, normalizes the payload and appends
//! it to a bounded FIFO. A flush owner calls
//! [`BatchBuilder::build_events_payload`] to snapshot the queue into a
//! [`Batch`] (or [`BatchBuilder::snapshot`] to also learn which queue entries
//! it covers) and [`BatchBuilder::remove_events`] once the attempt is done.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use beacon_core::constants::MAX_QUEUE_LENGTH;
use beacon_core::{Batch, Clock, EventId, EventPayload, EventRecord, GlobalMetadata};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::SharedContext;
use crate::utm::parse_utm;

/// Builder limits and batch enrichment.
#[derive(Clone, Debug)]
pub struct BuilderConfig {
    /// Events held before the oldest is evicted.
    pub max_queue_length: usize,
    /// Attached to every batch when present and non-empty.
    pub global_metadata: Option<GlobalMetadata>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_queue_length: MAX_QUEUE_LENGTH,
            global_metadata: None,
        }
    }
}

/// A built batch plus the queue entries it accounts for.
#[derive(Clone, Debug)]
pub struct BatchSnapshot {
    /// Sorted, deduplicated batch.
    pub batch: Batch,
    /// Ids of every queued event folded into `batch`, duplicates included.
    pub covered: Vec<EventId>,
}

/// Bounded in-memory queue of captured events.
pub struct BatchBuilder {
    context: SharedContext,
    clock: Arc<dyn Clock>,
    config: BuilderConfig,
    queue: Mutex<VecDeque<EventRecord>>,
}

impl BatchBuilder {
    /// Create an empty builder.
    pub fn new(context: SharedContext, clock: Arc<dyn Clock>, config: BuilderConfig) -> Self {
        Self {
            context,
            clock,
            config,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue an event.
    ///
    /// Returns the assigned id, or `None` when normalization dropped the
    /// payload. Never fails on malformed metadata.
    pub fn track(&self, payload: EventPayload) -> Option<EventId> {
        let page_url = self.context.page_url();
        let payload = self.normalize(payload, &page_url)?;

        let record = EventRecord {
            id: EventId::new(),
            timestamp: self.clock.now_ms(),
            page_url,
            payload,
        };
        let id = record.id.clone();

        let mut queue = self.queue.lock();
        if self.config.max_queue_length > 0 && queue.len() >= self.config.max_queue_length {
            if let Some(evicted) = queue.pop_front() {
                warn!(
                    event_id = %evicted.id,
                    event_type = %evicted.event_type(),
                    max = self.config.max_queue_length,
                    "event queue full, dropping oldest event"
                );
            }
        }
        debug!(event_id = %id, event_type = %record.event_type(), "event queued");
        queue.push_back(record);
        Some(id)
    }

    fn normalize(&self, payload: EventPayload, page_url: &str) -> Option<EventPayload> {
        match payload {
            EventPayload::Custom { mut custom_event } => {
                let trimmed = custom_event.name.trim();
                if trimmed.is_empty() {
                    warn!("custom event without a name, dropping");
                    return None;
                }
                if trimmed.len() != custom_event.name.len() {
                    custom_event.name = trimmed.to_owned();
                }
                Some(EventPayload::Custom { custom_event })
            }
            EventPayload::Scroll { mut scroll_data } => {
                scroll_data.depth = scroll_data.depth.min(100);
                scroll_data.max_depth_reached = scroll_data.max_depth_reached.map(|d| d.min(100));
                Some(EventPayload::Scroll { scroll_data })
            }
            EventPayload::WebVitals { web_vitals } if !web_vitals.value.is_finite() => {
                warn!(vital = %web_vitals.kind, "non-finite web vital value, dropping");
                None
            }
            EventPayload::SessionStart { referrer, utm } => {
                let referrer = referrer.or_else(|| self.context.snapshot().referrer);
                let utm = utm.filter(|u| !u.is_empty()).or_else(|| parse_utm(page_url));
                Some(EventPayload::SessionStart { referrer, utm })
            }
            other => Some(other),
        }
    }

    /// Snapshot the queue into a batch.
    ///
    /// Events are stable-sorted by timestamp and deduplicated by
    /// [`EventRecord::signature`], keeping the first occurrence. The queue
    /// itself is left untouched.
    pub fn build_events_payload(&self) -> Batch {
        self.snapshot().batch
    }

    /// Like [`BatchBuilder::build_events_payload`], but also returns the id
    /// of every queued event the batch covers, including duplicates that
    /// collapsed into an earlier occurrence. Pass those ids to
    /// [`BatchBuilder::remove_events`] once the batch has been handed off.
    pub fn snapshot(&self) -> BatchSnapshot {
        let mut events: Vec<EventRecord> = self.queue.lock().iter().cloned().collect();
        let covered: Vec<EventId> = events.iter().map(|e| e.id.clone()).collect();
        events.sort_by_key(|e| e.timestamp);

        let mut seen = HashSet::with_capacity(events.len());
        let before = events.len();
        events.retain(|e| seen.insert(e.signature()));
        if events.len() < before {
            debug!(removed = before - events.len(), "collapsed duplicate events");
        }

        let context = self.context.snapshot();
        let batch = Batch {
            user_id: context.user_id,
            session_id: context.session_id,
            device: context.device,
            events,
            global_metadata: self
                .config
                .global_metadata
                .clone()
                .filter(|m| !m.is_empty()),
        };
        BatchSnapshot { batch, covered }
    }

    /// Number of queued events.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Copy of the queued events in enqueue order.
    pub fn event_queue(&self) -> Vec<EventRecord> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Remove events by id. Returns how many were removed.
    pub fn remove_events(&self, ids: &[EventId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let ids: HashSet<&EventId> = ids.iter().collect();
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|e| !ids.contains(&e.id));
        before - queue.len()
    }

    /// Drop every queued event.
    pub fn clear_queue(&self) {
        self.queue.lock().clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
