//! End-to-end delivery behavior against a real HTTP endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use beacon_core::logging::capture_logs;
use beacon_core::{
    Batch, DeviceType, EventId, EventPayload, EventRecord, ManualClock, PersistedBatch, SessionId,
    UserId,
};
use beacon_delivery::mock::{MockBeacon, MockReply, MockTransport};
use beacon_delivery::{
    DeliveryOutcome, EventSender, HttpBeacon, RetryPolicy, SendCallbacks, SenderConfig,
    TransformError, TransformHook,
};
use beacon_queue::{SessionContext, SharedContext};
use beacon_settings::Destination;
use beacon_store::{KeyValueStore, MemoryStore};
use serde_json::Value;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOW: i64 = 1_700_000_000_000;
const HOUR_MS: i64 = 3_600_000;

fn config(url: String) -> SenderConfig {
    SenderConfig {
        url,
        destination: Destination::Custom,
        integration: None,
        request_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        persisted_expiry_ms: 24 * HOUR_MS,
        permanent_error_throttle_ms: 60_000,
    }
}

fn context() -> SharedContext {
    SharedContext::new(SessionContext {
        user_id: UserId::from("u1"),
        session_id: SessionId::from("s1"),
        device: DeviceType::Desktop,
        page_url: "https://shop.test/checkout".into(),
        referrer: None,
    })
}

fn batch(n: usize) -> Batch {
    Batch {
        user_id: UserId::from("u1"),
        session_id: SessionId::from("s1"),
        device: DeviceType::Desktop,
        events: (0..n)
            .map(|i| EventRecord {
                id: EventId::from(format!("e{i}")),
                timestamp: NOW + i as i64,
                page_url: "https://shop.test/checkout".into(),
                payload: EventPayload::custom(format!("step-{i}"), None),
            })
            .collect(),
        global_metadata: None,
    }
}

struct Setup {
    sender: EventSender,
    store: Arc<MemoryStore>,
    clock: ManualClock,
}

fn http_sender(config: SenderConfig) -> Setup {
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(NOW);
    let sender = EventSender::builder(config, context(), store.clone())
        .beacon(Arc::new(MockBeacon::unsupported()))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    Setup {
        sender,
        store,
        clock,
    }
}

async fn collector(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/e"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map_or(0, |r| r.len())
}

fn persisted(store: &MemoryStore) -> Option<PersistedBatch> {
    store
        .get_item("queue:u1")
        .unwrap()
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

fn failure_signal() -> (SendCallbacks, oneshot::Receiver<()>) {
    let (tx, rx) = oneshot::channel();
    let callbacks = SendCallbacks::new().on_failure(move || {
        let _ = tx.send(());
    });
    (callbacks, rx)
}

// ─────────────────────────────────────────────────────────────────────────────
// Reliable path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delivers_envelope_to_collector() {
    let server = collector(200).await;
    let s = http_sender(config(format!("{}/e", server.uri())));

    assert!(s.sender.send_events_queue(batch(2), SendCallbacks::new()).await);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["user_id"], "u1");
    assert_eq!(body["events"].as_array().unwrap().len(), 2);
    assert_eq!(body["_metadata"]["referer"], "https://shop.test/checkout");
    assert_eq!(body["_metadata"]["timestamp"], NOW);
}

#[tokio::test]
async fn permanent_and_transient_differ_in_persistence() {
    let rejected = collector(403).await;
    let s = http_sender(config(format!("{}/e", rejected.uri())));
    let (callbacks, failed) = failure_signal();
    assert!(!s.sender.send_events_queue(batch(1), callbacks).await);
    assert!(failed.await.is_ok());
    assert!(s.store.is_empty());
    assert!(!s.sender.retry_snapshot().is_retrying);

    let unavailable = collector(503).await;
    let mut cfg = config(format!("{}/e", unavailable.uri()));
    cfg.retry.base_delay = Duration::from_secs(30);
    cfg.retry.max_delay = Duration::from_secs(30);
    let s = http_sender(cfg);
    assert!(!s.sender.send_events_queue(batch(3), SendCallbacks::new()).await);
    let record = persisted(&s.store).unwrap();
    assert_eq!(record.events.len(), 3);
    assert_eq!(record.persisted_at, NOW);
    s.sender.stop();
}

#[tokio::test]
async fn failure_while_retrying_does_not_schedule_second_retry() {
    let server = collector(500).await;
    let mut cfg = config(format!("{}/e", server.uri()));
    cfg.retry.base_delay = Duration::from_secs(30);
    cfg.retry.max_delay = Duration::from_secs(30);
    let s = http_sender(cfg);

    assert!(!s.sender.send_events_queue(batch(1), SendCallbacks::new()).await);
    assert!(s.sender.retry_snapshot().is_retrying);

    let (callbacks, failed) = failure_signal();
    assert!(!s.sender.send_events_queue(batch(2), callbacks).await);
    assert!(failed.await.is_ok());

    let snapshot = s.sender.retry_snapshot();
    assert_eq!(snapshot.retries_scheduled_total, 1);
    assert!(snapshot.has_scheduled_retry);
    assert_eq!(request_count(&server).await, 2);
    s.sender.stop();
}

#[tokio::test]
async fn retries_exhausted_clears_persisted_copy() {
    let server = collector(500).await;
    let s = http_sender(config(format!("{}/e", server.uri())));
    let (callbacks, failed) = failure_signal();

    assert!(!s.sender.send_events_queue(batch(2), callbacks).await);
    tokio::time::timeout(Duration::from_secs(5), failed)
        .await
        .expect("retry chain should finish")
        .unwrap();

    assert_eq!(request_count(&server).await, 4);
    assert!(s.store.get_item("queue:u1").unwrap().is_none());
    assert!(!s.sender.retry_snapshot().is_retrying);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(request_count(&server).await, 4);
}

#[tokio::test]
async fn timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let mut cfg = config(format!("{}/e", server.uri()));
    cfg.request_timeout = Duration::from_millis(50);
    let s = http_sender(cfg);

    let outcome = s.sender.attempt(&batch(1)).await;
    assert!(matches!(outcome, DeliveryOutcome::Transient { .. }));
    assert!(persisted(&s.store).is_some());
}

#[tokio::test]
async fn stop_is_idempotent_and_silences_pending_retry() {
    let server = collector(500).await;
    let mut cfg = config(format!("{}/e", server.uri()));
    cfg.retry.base_delay = Duration::from_millis(50);
    let s = http_sender(cfg);
    let calls = Arc::new(AtomicUsize::new(0));
    let (seen_ok, seen_err) = (Arc::clone(&calls), Arc::clone(&calls));

    s.sender.stop();
    let callbacks = SendCallbacks::new()
        .on_success(move |_, _, _| {
            let _ = seen_ok.fetch_add(1, Ordering::SeqCst);
        })
        .on_failure(move || {
            let _ = seen_err.fetch_add(1, Ordering::SeqCst);
        });
    assert!(!s.sender.send_events_queue(batch(1), callbacks).await);
    s.sender.stop();
    s.sender.stop();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(request_count(&server).await, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!s.sender.retry_snapshot().is_retrying);
}

// ─────────────────────────────────────────────────────────────────────────────
// Transforms
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn all_events_filtered_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let s = http_sender(config(format!("{}/e", server.uri())));
    s.sender
        .transformers()
        .set_transformer(TransformHook::BeforeSend, |_| Ok(None));

    let (tx, rx) = oneshot::channel();
    let ok = s
        .sender
        .send_events_queue(
            batch(3),
            SendCallbacks::new().on_success(move |n, events, _| {
                let _ = tx.send((n, events.len()));
            }),
        )
        .await;
    assert!(ok);
    assert_eq!(rx.await.unwrap(), (0, 0));
}

#[tokio::test]
async fn faulty_hooks_send_original_batch() {
    let server = collector(200).await;
    let s = http_sender(config(format!("{}/e", server.uri())));
    s.sender
        .transformers()
        .set_transformer(TransformHook::BeforeSend, |_| panic!("integrator bug"));
    s.sender
        .transformers()
        .set_transformer(TransformHook::BeforeBatch, |_| {
            Err(TransformError::Hook("bad tenant".into()))
        });

    assert!(s.sender.send_events_queue(batch(2), SendCallbacks::new()).await);

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["events"][0]["custom_event"]["name"], "step-0");
    assert_eq!(body["events"][1]["custom_event"]["name"], "step-1");
}

// ─────────────────────────────────────────────────────────────────────────────
// Best-effort path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_beacon_skips_persistence() {
    let server = collector(200).await;
    let store = Arc::new(MemoryStore::new());
    let sender = EventSender::builder(config(format!("{}/e", server.uri())), context(), store.clone())
        .beacon(Arc::new(HttpBeacon::new().unwrap()))
        .build()
        .unwrap();

    assert!(sender.send_events_queue_sync(batch(2)));
    assert!(store.is_empty());

    let mut delivered = 0;
    for _ in 0..100 {
        delivered = request_count(&server).await;
        if delivered > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(delivered, 1);
}

#[tokio::test]
async fn refused_or_missing_beacon_persists() {
    let store = Arc::new(MemoryStore::new());
    let sender = EventSender::builder(config("http://127.0.0.1:9/e".into()), context(), store.clone())
        .transport(Arc::new(MockTransport::always(MockReply::Status(200))))
        .beacon(Arc::new(MockBeacon::rejecting()))
        .build()
        .unwrap();
    assert!(!sender.send_events_queue_sync(batch(1)));
    assert_eq!(persisted(&store).unwrap().events.len(), 1);

    let store = Arc::new(MemoryStore::new());
    let sender = EventSender::builder(config("http://127.0.0.1:9/e".into()), context(), store.clone())
        .transport(Arc::new(MockTransport::always(MockReply::Status(200))))
        .beacon(Arc::new(MockBeacon::unsupported()))
        .build()
        .unwrap();
    assert!(!sender.send_events_queue_sync(batch(2)));
    assert_eq!(persisted(&store).unwrap().events.len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Recovery
// ─────────────────────────────────────────────────────────────────────────────

fn seed(store: &MemoryStore, persisted_at: i64) {
    let record = PersistedBatch::new(&batch(2), persisted_at);
    store
        .set_item("queue:u1", &serde_json::to_string(&record).unwrap())
        .unwrap();
}

#[tokio::test]
async fn recovery_ignores_records_older_than_a_day() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let s = http_sender(config(format!("{}/e", server.uri())));
    seed(&s.store, NOW - 25 * HOUR_MS);

    assert!(!s.sender.recover_persisted_events(SendCallbacks::new()).await);
    assert!(s.store.is_empty());
}

#[tokio::test]
async fn recovery_delivers_recent_record() {
    let server = collector(200).await;
    let s = http_sender(config(format!("{}/e", server.uri())));
    seed(&s.store, NOW - HOUR_MS);

    let (tx, rx) = oneshot::channel();
    let ok = s
        .sender
        .recover_persisted_events(SendCallbacks::new().on_success(move |n, _, _| {
            let _ = tx.send(n);
        }))
        .await;
    assert!(ok);
    assert_eq!(rx.await.unwrap(), 2);
    assert!(s.store.is_empty());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn recovery_discards_unreadable_and_empty_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let s = http_sender(config(format!("{}/e", server.uri())));

    s.store.set_item("queue:u1", "not json").unwrap();
    assert!(!s.sender.recover_persisted_events(SendCallbacks::new()).await);
    assert!(s.store.is_empty());

    s.store
        .set_item("queue:u1", r#"{"userId":"u1","sessionId":"s1","events":[],"timestamp":1}"#)
        .unwrap();
    assert!(!s.sender.recover_persisted_events(SendCallbacks::new()).await);
    assert!(s.store.is_empty());
}

#[tokio::test]
async fn recovery_permanent_failure_clears_record() {
    let server = collector(400).await;
    let s = http_sender(config(format!("{}/e", server.uri())));
    seed(&s.store, NOW - HOUR_MS);
    s.clock.advance(1);

    let (callbacks, failed) = failure_signal();
    assert!(!s.sender.recover_persisted_events(callbacks).await);
    assert!(failed.await.is_ok());
    assert!(s.store.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Diagnostics
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_permanent_errors_log_once_per_window() {
    let (logs, _guard) = capture_logs();
    let store = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(NOW);
    let transport = Arc::new(MockTransport::new(vec![
        MockReply::Status(403),
        MockReply::Status(403),
        MockReply::Status(401),
    ]));
    let sender = EventSender::builder(config("https://collect.test/e".into()), context(), store)
        .transport(transport)
        .beacon(Arc::new(MockBeacon::unsupported()))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    assert!(!sender.send_events_queue(batch(1), SendCallbacks::new()).await);
    clock.advance(10_000);
    assert!(!sender.send_events_queue(batch(1), SendCallbacks::new()).await);
    assert_eq!(logs.count_matching("collector rejected batch"), 1);

    clock.advance(1_000);
    assert!(!sender.send_events_queue(batch(1), SendCallbacks::new()).await);
    assert_eq!(logs.count_matching("collector rejected batch"), 2);
}
