//! Tracker facade.
//!
//! Wires settings, store, session context, batch builder and sender, and
//! owns the periodic flush timer.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use beacon_core::{Clock, EventId, EventPayload, EventRecord, SystemClock};
use beacon_delivery::{
    BeaconTransport, EventSender, EventTransport, SendCallbacks, SenderConfig, TransformError,
    TransformHook,
};
use beacon_queue::{BatchBuilder, BatchSnapshot, BuilderConfig, SharedContext};
use beacon_settings::BeaconSettings;
use beacon_store::{KeyValueStore, MemoryStore, SqliteStore};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::Result;

/// Namespace used for the SDK's rows in a shared SQLite file.
pub const STORE_NAMESPACE: &str = "beacon";

/// Open the store configured in `settings.persistence`.
///
/// SQLite when `databasePath` is set, in-memory otherwise.
pub fn open_store(settings: &BeaconSettings) -> Result<Arc<dyn KeyValueStore>> {
    match &settings.persistence.database_path {
        Some(path) => Ok(Arc::new(SqliteStore::open(Path::new(path), STORE_NAMESPACE)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Assembles a [`Tracker`], with optional transport and clock overrides.
pub struct TrackerBuilder {
    settings: BeaconSettings,
    store: Arc<dyn KeyValueStore>,
    context: SharedContext,
    transport: Option<Arc<dyn EventTransport>>,
    beacon: Option<Arc<dyn BeaconTransport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TrackerBuilder {
    /// Use a custom reliable transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom best-effort transport.
    #[must_use]
    pub fn beacon(mut self, beacon: Arc<dyn BeaconTransport>) -> Self {
        self.beacon = Some(beacon);
        self
    }

    /// Use a custom clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate settings and build the tracker. Does not start timers.
    pub fn build(self) -> Result<Tracker> {
        self.settings.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut sender = EventSender::builder(
            SenderConfig::from_settings(&self.settings),
            self.context.clone(),
            self.store,
        )
        .clock(Arc::clone(&clock));
        if let Some(transport) = self.transport {
            sender = sender.transport(transport);
        }
        if let Some(beacon) = self.beacon {
            sender = sender.beacon(beacon);
        }
        let sender = sender.build()?;

        let builder = BatchBuilder::new(
            self.context.clone(),
            clock,
            BuilderConfig {
                max_queue_length: self.settings.queue.max_length,
                global_metadata: self.settings.global_metadata.clone(),
            },
        );

        Ok(Tracker {
            inner: Arc::new(TrackerInner {
                flush_interval: Duration::from_millis(self.settings.queue.flush_interval_ms),
                context: self.context,
                builder,
                sender,
                flush_lock: tokio::sync::Mutex::new(()),
                flush_task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

/// Event capture and delivery for one tracking scope.
///
/// Cheap to clone; clones share the queue, sender and timer.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    flush_interval: Duration,
    context: SharedContext,
    builder: BatchBuilder,
    sender: EventSender,
    flush_lock: tokio::sync::Mutex<()>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Tracker {
    /// Build a tracker with HTTP transports and the system clock.
    pub fn new(
        settings: BeaconSettings,
        store: Arc<dyn KeyValueStore>,
        context: SharedContext,
    ) -> Result<Self> {
        Self::builder(settings, store, context).build()
    }

    /// Start building a tracker.
    pub fn builder(
        settings: BeaconSettings,
        store: Arc<dyn KeyValueStore>,
        context: SharedContext,
    ) -> TrackerBuilder {
        TrackerBuilder {
            settings,
            store,
            context,
            transport: None,
            beacon: None,
            clock: None,
        }
    }

    /// Replay what a previous run persisted, then start the periodic flush.
    ///
    /// Calling `start` again only restarts the timer.
    pub async fn start(&self) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let _ = self
            .inner
            .sender
            .recover_persisted_events(SendCallbacks::new())
            .await;
        self.spawn_flush_timer();
        info!(interval_ms = self.inner.flush_interval.as_millis() as u64, "tracker started");
    }

    fn spawn_flush_timer(&self) {
        let weak: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.flush_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let _ = ticker.tick().await;
            loop {
                let _ = ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let _ = inner.flush().await;
            }
        });

        if let Some(previous) = self.inner.flush_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Enqueue an event. Returns its id, or `None` if it was dropped.
    pub fn track(&self, payload: EventPayload) -> Option<EventId> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            debug!("tracker shut down, ignoring event");
            return None;
        }
        self.inner.builder.track(payload)
    }

    /// Deliver the queued events over the reliable path.
    ///
    /// Flushed events leave the queue whatever the outcome; failures are
    /// persisted and retried by the sender.
    pub async fn flush(&self) -> bool {
        self.inner.flush().await
    }

    /// Hand the queued events to the best-effort path. For shutdown.
    pub fn flush_sync(&self) -> bool {
        let BatchSnapshot { batch, covered } = self.inner.builder.snapshot();
        if batch.is_empty() {
            return true;
        }
        let ok = self.inner.sender.send_events_queue_sync(batch);
        let _ = self.inner.builder.remove_events(&covered);
        ok
    }

    /// Register or replace a transform hook.
    pub fn set_transformer<F>(&self, hook: TransformHook, f: F)
    where
        F: Fn(Value) -> std::result::Result<Option<Value>, TransformError> + Send + Sync + 'static,
    {
        self.inner.sender.transformers().set_transformer(hook, f);
    }

    /// Register a transform hook by name (`"beforeSend"`, `"beforeBatch"`).
    pub fn set_transformer_named<F>(&self, hook: &str, f: F) -> std::result::Result<(), TransformError>
    where
        F: Fn(Value) -> std::result::Result<Option<Value>, TransformError> + Send + Sync + 'static,
    {
        self.inner.sender.transformers().set_transformer_named(hook, f)
    }

    /// Remove a transform hook. No-op when unset.
    pub fn remove_transformer(&self, hook: TransformHook) {
        self.inner.sender.transformers().remove_transformer(hook);
    }

    /// Number of queued events.
    pub fn queue_len(&self) -> usize {
        self.inner.builder.queue_len()
    }

    /// Copy of the queued events.
    pub fn event_queue(&self) -> Vec<EventRecord> {
        self.inner.builder.event_queue()
    }

    /// Session context shared with the lifecycle owner.
    pub fn context(&self) -> &SharedContext {
        &self.inner.context
    }

    /// The underlying sender.
    pub fn sender(&self) -> &EventSender {
        &self.inner.sender
    }

    /// Stop the flush timer, cancel pending retries and drop transform
    /// hooks. Idempotent. Queued events stay in memory.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.flush_task.lock().take() {
            handle.abort();
        }
        self.inner.sender.stop();
        self.inner.sender.transformers().clear();
        info!(queued = self.queue_len(), "tracker shut down");
    }

    /// Exit path for hosts about to stop the runtime: hand the queue to the
    /// best-effort path, wait up to `grace` for those requests, then
    /// [`Tracker::shutdown`].
    ///
    /// Returns whether the queue was accepted and drained in time.
    pub async fn close(&self, grace: Duration) -> bool {
        let accepted = self.flush_sync();
        let drained = self.inner.sender.drain_best_effort(grace).await;
        self.shutdown();
        accepted && drained
    }

    /// Whether [`Tracker::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("queued", &self.queue_len())
            .field("sender", &self.inner.sender)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl TrackerInner {
    async fn flush(&self) -> bool {
        let _guard = self.flush_lock.lock().await;
        let BatchSnapshot { batch, covered } = self.builder.snapshot();
        if batch.is_empty() {
            return true;
        }
        debug!(events = batch.len(), queued = covered.len(), "flushing");
        let ok = self
            .sender
            .send_events_queue(batch, SendCallbacks::new())
            .await;
        let _ = self.builder.remove_events(&covered);
        ok
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.flush_task.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ManualClock;
    use beacon_delivery::mock::{MockBeacon, MockReply, MockTransport};
    use beacon_queue::SessionContext;
    use beacon_settings::Destination;

    fn settings() -> BeaconSettings {
        let mut settings = BeaconSettings::default();
        settings.collector.url = "https://collect.test/e".into();
        settings.collector.destination = Destination::Custom;
        settings
    }

    fn tracker(transport: Arc<MockTransport>) -> Tracker {
        Tracker::builder(
            settings(),
            Arc::new(MemoryStore::new()),
            SharedContext::new(SessionContext {
                page_url: "https://shop.test/".into(),
                ..Default::default()
            }),
        )
        .transport(transport)
        .beacon(Arc::new(MockBeacon::accepting()))
        .clock(Arc::new(ManualClock::new(1_000)))
        .build()
        .unwrap()
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut bad = settings();
        bad.collector.url = String::new();
        let result = Tracker::new(bad, Arc::new(MemoryStore::new()), SharedContext::default());
        assert!(matches!(result, Err(crate::TrackerError::Settings(_))));
    }

    #[test]
    fn open_store_defaults_to_memory() {
        let store = open_store(&BeaconSettings::default()).unwrap();
        store.set_item("k", "v").unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn flush_empties_queue() {
        let transport = Arc::new(MockTransport::always(MockReply::Status(200)));
        let t = tracker(Arc::clone(&transport));
        let _ = t.track(EventPayload::custom("a", None));
        let _ = t.track(EventPayload::custom("b", None));
        assert_eq!(t.queue_len(), 2);

        assert!(t.flush().await);
        assert_eq!(t.queue_len(), 0);
        assert_eq!(transport.call_count(), 1);
        assert!(t.flush().await);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn flush_retires_collapsed_duplicates() {
        let transport = Arc::new(MockTransport::always(MockReply::Status(200)));
        let t = tracker(Arc::clone(&transport));
        let _ = t.track(EventPayload::custom("signup", None));
        let _ = t.track(EventPayload::custom("signup", None));

        assert!(t.flush().await);
        assert_eq!(t.queue_len(), 0);
        assert!(t.flush().await);
        assert_eq!(transport.call_count(), 1);
        let body = transport.last_body_json().unwrap();
        assert_eq!(body["events"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flush_sync_retires_collapsed_duplicates() {
        let beacon = Arc::new(MockBeacon::accepting());
        let t = Tracker::builder(settings(), Arc::new(MemoryStore::new()), SharedContext::default())
            .transport(Arc::new(MockTransport::always(MockReply::Status(200))))
            .beacon(beacon.clone())
            .clock(Arc::new(ManualClock::new(1_000)))
            .build()
            .unwrap();
        let _ = t.track(EventPayload::custom("closing", None));
        let _ = t.track(EventPayload::custom("closing", None));

        assert!(t.flush_sync());
        assert_eq!(t.queue_len(), 0);
        assert!(t.flush_sync());
        assert_eq!(beacon.sent().len(), 1);
    }

    #[tokio::test]
    async fn flush_sync_empties_queue() {
        let transport = Arc::new(MockTransport::always(MockReply::Status(200)));
        let t = tracker(Arc::clone(&transport));
        let _ = t.track(EventPayload::custom("a", None));
        assert!(t.flush_sync());
        assert_eq!(t.queue_len(), 0);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let t = tracker(Arc::new(MockTransport::always(MockReply::Status(200))));
        t.set_transformer(TransformHook::BeforeSend, |v| Ok(Some(v)));
        t.shutdown();
        t.shutdown();
        assert!(t.is_shut_down());
        assert!(!t.sender().transformers().is_set(TransformHook::BeforeSend));
        assert!(t.track(EventPayload::custom("late", None)).is_none());
    }

    #[tokio::test]
    async fn named_transformer_validation() {
        let t = tracker(Arc::new(MockTransport::always(MockReply::Status(200))));
        assert!(t.set_transformer_named("beforeBatch", |v| Ok(Some(v))).is_ok());
        assert!(matches!(
            t.set_transformer_named("afterSend", |v| Ok(Some(v))),
            Err(TransformError::UnknownHook(_))
        ));
        t.remove_transformer(TransformHook::BeforeBatch);
        assert!(!t.sender().transformers().is_set(TransformHook::BeforeBatch));
    }
}
