//! Network transports.
//!
//! - [`EventTransport`]: the reliable path. Awaitable, reports the HTTP
//!   status, bounded by a hard timeout.
//! - [`BeaconTransport`]: the best-effort path used at exit. Fire and
//!   forget; only reports whether the payload was accepted for sending.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::Batch;
use beacon_core::constants::{BEACON_MAX_PAYLOAD_BYTES, CLIENT_HEADER, VERSION};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::TransportError;

/// Awaitable POST of an encoded batch.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// POST `body` to `url` and return the response status.
    async fn post(&self, url: &str, body: String) -> Result<u16, TransportError>;
}

/// Fire-and-forget delivery for use when the host is going away.
pub trait BeaconTransport: Send + Sync {
    /// Whether the capability exists in this environment.
    fn is_supported(&self) -> bool;

    /// Queue `payload` for delivery. Returns `false` if it was refused.
    fn send_beacon(&self, url: &str, payload: Vec<u8>) -> bool;

    /// Hand over the requests still in flight so a caller can wait for them
    /// before tearing the runtime down. Transports that finish synchronously
    /// have nothing to hand over.
    fn take_in_flight(&self) -> Vec<JoinHandle<()>> {
        Vec::new()
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(client) = HeaderValue::from_str(&format!("beacon-rs/{VERSION}")) {
        let _ = headers.insert(CLIENT_HEADER, client);
    }
    headers
}

// ─────────────────────────────────────────────────────────────────────────────
// Reliable path
// ─────────────────────────────────────────────────────────────────────────────

/// [`EventTransport`] over `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn post(&self, url: &str, body: String) -> Result<u16, TransportError> {
        let response = self.client.post(url).body(body).send().await?;
        Ok(response.status().as_u16())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Best-effort path
// ─────────────────────────────────────────────────────────────────────────────

/// [`BeaconTransport`] that spawns a detached POST on the current Tokio runtime.
///
/// Supported only inside a runtime. Payloads above the beacon size limit are
/// refused, as a browser would.
///
/// `send_beacon` returning `true` means the request was spawned, not that it
/// reached the collector. If the runtime shuts down first the request is
/// lost and nothing was persisted. Hosts that can spare a moment at exit
/// should await [`BeaconTransport::take_in_flight`] (see
/// `EventSender::drain_best_effort`).
#[derive(Clone, Debug)]
pub struct HttpBeacon {
    client: reqwest::Client,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpBeacon {
    /// Build the underlying client.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers())
            .build()?;
        Ok(Self {
            client,
            in_flight: Arc::default(),
        })
    }
}

impl BeaconTransport for HttpBeacon {
    fn is_supported(&self) -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    fn send_beacon(&self, url: &str, payload: Vec<u8>) -> bool {
        if payload.len() > BEACON_MAX_PAYLOAD_BYTES {
            debug!(bytes = payload.len(), limit = BEACON_MAX_PAYLOAD_BYTES, "beacon payload too large");
            return false;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        let request = self.client.post(url).body(payload);
        let task = handle.spawn(async move {
            match request.send().await {
                Ok(response) => debug!(status = response.status().as_u16(), "beacon delivered"),
                Err(e) => debug!(error = %e, "beacon request failed"),
            }
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|t| !t.is_finished());
        in_flight.push(task);
        true
    }

    fn take_in_flight(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.in_flight.lock())
    }
}

/// [`BeaconTransport`] for environments without a best-effort channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBeacon;

impl BeaconTransport for NoBeacon {
    fn is_supported(&self) -> bool {
        false
    }

    fn send_beacon(&self, _url: &str, _payload: Vec<u8>) -> bool {
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    batch: &'a Batch,
    #[serde(rename = "_metadata")]
    metadata: EnvelopeMetadata<'a>,
}

#[derive(Serialize)]
struct EnvelopeMetadata<'a> {
    referer: &'a str,
    timestamp: i64,
}

/// Encode `batch` with the `_metadata: { referer, timestamp }` envelope.
pub fn encode_envelope(batch: &Batch, referer: &str, now_ms: i64) -> Result<String, TransportError> {
    let envelope = Envelope {
        batch,
        metadata: EnvelopeMetadata {
            referer,
            timestamp: now_ms,
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
