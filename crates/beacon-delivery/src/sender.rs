//! Transport sender.
//!
//! [`EventSender`] owns both delivery paths for a batch:
//!
//! - **Reliable** ([`EventSender::send_events_queue`]): transform, encode,
//!   POST with a hard timeout, classify. Transient failures persist the
//!   batch and arm the retry machine; permanent failures are dropped with a
//!   throttled warning.
//! - **Best-effort** ([`EventSender::send_events_queue_sync`]): transform and
//!   hand the payload to a [`BeaconTransport`] without waiting. Anything the
//!   beacon refuses is persisted for the next start.
//!
//! [`EventSender::recover_persisted_events`] replays what a previous run
//! left behind.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use beacon_core::{Batch, Clock, EventRecord, SystemClock};
use beacon_queue::SharedContext;
use beacon_settings::{BeaconSettings, Destination};
use beacon_store::KeyValueStore;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::classify::{FailureClass, classify_status, classify_transport_error, should_log_permanent};
use crate::errors::TransportError;
use crate::persistence::{PersistedQueue, storage_key};
use crate::retry::{RetryPolicy, RetrySnapshot, RetryState};
use crate::transform::{TransformResult, TransformerRegistry};
use crate::transport::{BeaconTransport, EventTransport, HttpBeacon, HttpTransport, encode_envelope};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Static sender configuration.
#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Collection endpoint.
    pub url: String,
    /// Transform hooks apply only to [`Destination::Custom`].
    pub destination: Destination,
    /// Scopes the storage key when set.
    pub integration: Option<String>,
    /// Hard timeout on a reliable-path request.
    pub request_timeout: Duration,
    /// Backoff after transient failures.
    pub retry: RetryPolicy,
    /// Persisted batches older than this are discarded.
    pub persisted_expiry_ms: i64,
    /// Throttle window for repeated permanent-error warnings.
    pub permanent_error_throttle_ms: i64,
}

impl SenderConfig {
    /// Derive from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &BeaconSettings) -> Self {
        Self {
            url: settings.collector.url.clone(),
            destination: settings.collector.destination,
            integration: settings.collector.integration.clone(),
            request_timeout: Duration::from_millis(settings.collector.request_timeout_ms),
            retry: RetryPolicy::from(&settings.retry),
            persisted_expiry_ms: settings.persistence.expiry_ms,
            permanent_error_throttle_ms: settings.diagnostics.permanent_error_throttle_ms,
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::from_settings(&BeaconSettings::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callbacks
// ─────────────────────────────────────────────────────────────────────────────

/// Called with the number of events delivered, the events, and the batch.
pub type SuccessCallback = Box<dyn FnOnce(usize, &[EventRecord], &Batch) + Send>;

/// Called once when a logical send ends without delivery.
pub type FailureCallback = Box<dyn FnOnce() + Send>;

/// Optional completion callbacks for one logical send.
///
/// At most one of the two fires, at most once. When a transient failure arms
/// the retry machine the callbacks travel with the retry chain and fire with
/// its final outcome. That can be seconds after
/// [`EventSender::send_events_queue`] has already returned `false`, and it
/// can be `on_success` if a later retry gets through. Callbacks moved into a
/// chain that [`EventSender::stop`] cancels never fire.
#[derive(Default)]
pub struct SendCallbacks {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl SendCallbacks {
    /// No callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the success callback.
    #[must_use]
    pub fn on_success(mut self, f: impl FnOnce(usize, &[EventRecord], &Batch) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Set the failure callback.
    #[must_use]
    pub fn on_failure(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(f));
        self
    }

    fn succeed(self, batch: &Batch) {
        if let Some(f) = self.on_success {
            f(batch.len(), &batch.events, batch);
        }
    }

    fn succeed_empty(self, batch: &Batch) {
        if let Some(f) = self.on_success {
            f(0, &[], batch);
        }
    }

    fn fail(self) {
        if let Some(f) = self.on_failure {
            f();
        }
    }
}

impl std::fmt::Debug for SendCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcome of one attempt
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a single reliable-path attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryOutcome {
    /// 2xx. Carries the batch as sent (after transforms).
    Delivered {
        /// The transformed batch that went over the wire.
        batch: Batch,
    },
    /// Transforms left nothing to send; no request was made.
    Skipped,
    /// 4xx. Not persisted, not retried.
    Permanent {
        /// Response status.
        status: u16,
    },
    /// Network error, timeout or non-4xx failure status. Persisted.
    Transient {
        /// Short description for logs.
        reason: String,
    },
    /// The batch could not be encoded. Not persisted, not retried.
    Invalid {
        /// Encoder error.
        reason: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles an [`EventSender`], defaulting to HTTP transports and the
/// system clock.
pub struct EventSenderBuilder {
    config: SenderConfig,
    context: SharedContext,
    store: Arc<dyn KeyValueStore>,
    transport: Option<Arc<dyn EventTransport>>,
    beacon: Option<Arc<dyn BeaconTransport>>,
    clock: Option<Arc<dyn Clock>>,
    transformers: Option<Arc<TransformerRegistry>>,
}

impl EventSenderBuilder {
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

    /// Share a transformer registry.
    #[must_use]
    pub fn transformers(mut self, transformers: Arc<TransformerRegistry>) -> Self {
        self.transformers = Some(transformers);
        self
    }

    /// Build the sender. Fails only if a default HTTP client cannot be built.
    pub fn build(self) -> Result<EventSender, TransportError> {
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(self.config.request_timeout)?),
        };
        let beacon = match self.beacon {
            Some(b) => b,
            None => Arc::new(HttpBeacon::new()?),
        };

        Ok(EventSender {
            inner: Arc::new(SenderInner {
                persisted: PersistedQueue::new(self.store),
                context: self.context,
                transport,
                beacon,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                transformers: self.transformers.unwrap_or_default(),
                retry: Mutex::new(RetryState::default()),
                retries_scheduled: AtomicU64::new(0),
                config: self.config,
            }),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sender
// ─────────────────────────────────────────────────────────────────────────────

/// Delivers batches to the collector. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventSender {
    inner: Arc<SenderInner>,
}

struct SenderInner {
    config: SenderConfig,
    context: SharedContext,
    persisted: PersistedQueue,
    transport: Arc<dyn EventTransport>,
    beacon: Arc<dyn BeaconTransport>,
    clock: Arc<dyn Clock>,
    transformers: Arc<TransformerRegistry>,
    retry: Mutex<RetryState>,
    retries_scheduled: AtomicU64,
}

impl EventSender {
    /// Start building a sender.
    pub fn builder(
        config: SenderConfig,
        context: SharedContext,
        store: Arc<dyn KeyValueStore>,
    ) -> EventSenderBuilder {
        EventSenderBuilder {
            config,
            context,
            store,
            transport: None,
            beacon: None,
            clock: None,
            transformers: None,
        }
    }

    /// The transformer registry consulted on every send.
    pub fn transformers(&self) -> &Arc<TransformerRegistry> {
        &self.inner.transformers
    }

    /// Storage key for the current user scope.
    pub fn storage_key(&self) -> String {
        self.inner.storage_key()
    }

    /// Current retry machine state.
    pub fn retry_snapshot(&self) -> RetrySnapshot {
        let state = self.inner.retry.lock();
        RetrySnapshot {
            is_retrying: state.is_retrying,
            retry_count: state.retry_count,
            has_scheduled_retry: state.scheduled.is_some(),
            retries_scheduled_total: self.inner.retries_scheduled.load(Ordering::Relaxed),
        }
    }

    /// Make one reliable-path attempt without touching the retry machine.
    pub async fn attempt(&self, batch: &Batch) -> DeliveryOutcome {
        self.inner.attempt(batch, None).await
    }

    /// Reliable send. Returns `true` when the batch was delivered or
    /// nothing was left to send after transforms.
    pub async fn send_events_queue(&self, batch: Batch, callbacks: SendCallbacks) -> bool {
        if batch.is_empty() {
            callbacks.succeed_empty(&batch);
            return true;
        }

        match self.inner.attempt(&batch, None).await {
            DeliveryOutcome::Delivered { batch: sent } => {
                callbacks.succeed(&sent);
                true
            }
            DeliveryOutcome::Skipped => {
                callbacks.succeed_empty(&batch);
                true
            }
            DeliveryOutcome::Permanent { .. } | DeliveryOutcome::Invalid { .. } => {
                callbacks.fail();
                false
            }
            DeliveryOutcome::Transient { .. } => {
                if let Err(callbacks) = self.inner.schedule_retry(batch, callbacks) {
                    callbacks.fail();
                }
                false
            }
        }
    }

    /// Best-effort send for shutdown paths. Never waits on the network and
    /// never schedules retries.
    pub fn send_events_queue_sync(&self, batch: Batch) -> bool {
        self.inner.send_best_effort(batch)
    }

    /// Wait up to `timeout` for best-effort requests still in flight.
    ///
    /// Returns `false` if the deadline passed first; the remaining requests
    /// keep running detached.
    pub async fn drain_best_effort(&self, timeout: Duration) -> bool {
        let in_flight = self.inner.beacon.take_in_flight();
        if in_flight.is_empty() {
            return true;
        }
        let pending = in_flight.len();
        let drained = tokio::time::timeout(timeout, async {
            for task in in_flight {
                let _ = task.await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(pending, timeout_ms = timeout.as_millis() as u64, "best-effort requests still in flight");
        }
        drained
    }

    /// Replay the batch a previous run persisted for this user scope.
    ///
    /// Makes exactly one attempt. Expired, empty or unreadable records are
    /// discarded. A transient failure leaves the record (with its original
    /// persistence time) for the next start. Returns `true` on delivery.
    pub async fn recover_persisted_events(&self, callbacks: SendCallbacks) -> bool {
        self.inner.recover(callbacks).await
    }

    /// Cancel any pending retry and return to idle. Idempotent; fires no
    /// callbacks.
    pub fn stop(&self) {
        let mut state = self.inner.retry.lock();
        let had_retry = state.scheduled.is_some();
        state.stop();
        debug!(had_retry, "sender stopped");
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("url", &self.inner.config.url)
            .field("destination", &self.inner.config.destination)
            .field("retry", &self.retry_snapshot())
            .finish_non_exhaustive()
    }
}

impl SenderInner {
    fn storage_key(&self) -> String {
        storage_key(&self.context.user_id(), self.config.integration.as_deref())
    }

    fn transform(&self, batch: &Batch) -> TransformResult {
        match self.config.destination {
            Destination::Managed => TransformResult::Send(batch.clone()),
            Destination::Custom => self.transformers.apply(batch),
        }
    }

    fn persist(&self, key: &str, batch: &Batch, persisted_at: Option<i64>) {
        let at = persisted_at.unwrap_or_else(|| self.clock.now_ms());
        let _ = self.persisted.save(key, batch, at);
    }

    /// One reliable-path attempt. Persists on transient failure (keeping
    /// `persisted_at` when given) and clears the persisted copy on success.
    async fn attempt(&self, batch: &Batch, persisted_at: Option<i64>) -> DeliveryOutcome {
        let key = self.storage_key();
        let to_send = match self.transform(batch) {
            TransformResult::Send(b) => b,
            TransformResult::Skip => return DeliveryOutcome::Skipped,
        };

        let referer = self.context.page_url();
        let body = match encode_envelope(&to_send, &referer, self.clock.now_ms()) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "dropping batch that could not be encoded");
                metrics::counter!("beacon_batches_failed_total", "class" => "invalid").increment(1);
                return DeliveryOutcome::Invalid {
                    reason: e.to_string(),
                };
            }
        };

        let result = match tokio::time::timeout(
            self.config.request_timeout,
            self.transport.post(&self.config.url, body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let class = match &result {
            Ok(status) => classify_status(*status),
            Err(e) => Some(classify_transport_error(e)),
        };

        match (result, class) {
            (Ok(status), None) => {
                self.persisted.clear(&key);
                metrics::counter!("beacon_batches_delivered_total").increment(1);
                debug!(status, events = to_send.len(), "batch delivered");
                DeliveryOutcome::Delivered { batch: to_send }
            }
            (Ok(status), Some(FailureClass::Permanent)) => {
                metrics::counter!("beacon_batches_failed_total", "class" => "permanent").increment(1);
                self.log_permanent(status);
                DeliveryOutcome::Permanent { status }
            }
            (Err(e), Some(FailureClass::Permanent)) => {
                metrics::counter!("beacon_batches_failed_total", "class" => "invalid").increment(1);
                warn!(error = %e, "dropping batch after unrecoverable transport error");
                DeliveryOutcome::Invalid {
                    reason: e.to_string(),
                }
            }
            (result, _) => {
                let reason = match result {
                    Ok(status) => format!("HTTP {status}"),
                    Err(e) => e.to_string(),
                };
                metrics::counter!("beacon_batches_failed_total", "class" => "transient").increment(1);
                debug!(reason = %reason, events = batch.len(), "transient delivery failure");
                self.persist(&key, batch, persisted_at);
                DeliveryOutcome::Transient { reason }
            }
        }
    }

    fn log_permanent(&self, status: u16) {
        let now = self.clock.now_ms();
        let should_log = {
            let mut state = self.retry.lock();
            should_log_permanent(
                &mut state.last_permanent_error,
                status,
                now,
                self.config.permanent_error_throttle_ms,
            )
        };
        if should_log {
            warn!(status, url = %self.config.url, "collector rejected batch, events dropped");
        }
    }

    /// Arm the retry machine for `batch`. Hands the callbacks back when no
    /// retry could be scheduled.
    fn schedule_retry(
        self: &Arc<Self>,
        batch: Batch,
        callbacks: SendCallbacks,
    ) -> Result<(), SendCallbacks> {
        let mut state = self.retry.lock();
        if state.is_retrying || state.scheduled.is_some() {
            debug!("retry already pending, not scheduling another");
            return Err(callbacks);
        }
        if state.retry_count >= self.config.retry.max_retries {
            drop(state);
            debug!(events = batch.len(), "no retry budget, dropping batch");
            self.persisted.clear(&self.storage_key());
            return Err(callbacks);
        }
        self.schedule_locked(&mut state, batch, callbacks)
    }

    fn schedule_locked(
        self: &Arc<Self>,
        state: &mut RetryState,
        batch: Batch,
        callbacks: SendCallbacks,
    ) -> Result<(), SendCallbacks> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime available, cannot schedule retry");
            return Err(callbacks);
        };

        let delay = self.config.retry.delay_for(state.retry_count);
        let generation = state.generation;
        let inner = Arc::clone(self);

        state.is_retrying = true;
        state.scheduled = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_retry(generation, batch, callbacks).await;
        }));

        let _ = self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("beacon_retries_scheduled_total").increment(1);
        debug!(
            attempt = state.retry_count + 1,
            max_retries = self.config.retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        Ok(())
    }

    async fn fire_retry(self: Arc<Self>, generation: u64, batch: Batch, callbacks: SendCallbacks) {
        {
            let mut state = self.retry.lock();
            if state.generation != generation {
                return;
            }
            state.scheduled = None;
            state.retry_count += 1;
        }

        let outcome = self.attempt(&batch, None).await;
        let key = self.storage_key();

        let mut state = self.retry.lock();
        if state.generation != generation {
            return;
        }

        match outcome {
            DeliveryOutcome::Delivered { batch: sent } => {
                info!(retries = state.retry_count, "batch delivered after retry");
                state.reset();
                drop(state);
                callbacks.succeed(&sent);
            }
            DeliveryOutcome::Skipped => {
                state.reset();
                drop(state);
                self.persisted.clear(&key);
                callbacks.succeed_empty(&batch);
            }
            DeliveryOutcome::Permanent { .. } | DeliveryOutcome::Invalid { .. } => {
                state.reset();
                drop(state);
                self.persisted.clear(&key);
                callbacks.fail();
            }
            DeliveryOutcome::Transient { reason } => {
                if state.retry_count >= self.config.retry.max_retries {
                    warn!(
                        retries = state.retry_count,
                        reason = %reason,
                        events = batch.len(),
                        "retries exhausted, dropping batch"
                    );
                    state.reset();
                    drop(state);
                    self.persisted.clear(&key);
                    callbacks.fail();
                    return;
                }
                state.is_retrying = false;
                if let Err(callbacks) = self.schedule_locked(&mut state, batch, callbacks) {
                    state.reset();
                    drop(state);
                    callbacks.fail();
                }
            }
        }
    }

    fn send_best_effort(&self, batch: Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        let key = self.storage_key();
        let to_send = match self.transform(&batch) {
            TransformResult::Send(b) => b,
            TransformResult::Skip => return true,
        };

        if !self.beacon.is_supported() {
            debug!("best-effort transport unavailable, persisting batch");
            self.persist(&key, &batch, None);
            return false;
        }

        let body = match encode_envelope(&to_send, &self.context.page_url(), self.clock.now_ms()) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "dropping batch that could not be encoded");
                return false;
            }
        };

        if self.beacon.send_beacon(&self.config.url, body.into_bytes()) {
            debug!(events = to_send.len(), "batch handed to best-effort transport");
            true
        } else {
            debug!("best-effort transport refused batch, persisting");
            self.persist(&key, &batch, None);
            false
        }
    }

    async fn recover(&self, callbacks: SendCallbacks) -> bool {
        let key = self.storage_key();
        let Some(record) = self.persisted.load(&key) else {
            return false;
        };

        let now = self.clock.now_ms();
        if !record.is_recoverable(now, self.config.persisted_expiry_ms) {
            debug!(
                key = %key,
                events = record.events.len(),
                age_ms = now.saturating_sub(record.persisted_at),
                "discarding stale persisted batch"
            );
            self.persisted.clear(&key);
            return false;
        }

        let persisted_at = record.persisted_at;
        let batch = record.into_batch();
        info!(key = %key, events = batch.len(), "recovering persisted batch");

        match self.attempt(&batch, Some(persisted_at)).await {
            DeliveryOutcome::Delivered { batch: sent } => {
                callbacks.succeed(&sent);
                true
            }
            DeliveryOutcome::Skipped => {
                self.persisted.clear(&key);
                callbacks.succeed_empty(&batch);
                true
            }
            DeliveryOutcome::Permanent { .. } | DeliveryOutcome::Invalid { .. } => {
                self.persisted.clear(&key);
                callbacks.fail();
                false
            }
            DeliveryOutcome::Transient { reason } => {
                info!(reason = %reason, "recovery failed, keeping batch for next start");
                callbacks.fail();
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
