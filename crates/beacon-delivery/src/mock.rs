//! Scripted transports for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::TransportError;
use crate::transport::{BeaconTransport, EventTransport};

/// Pre-programmed reply for one [`MockTransport::post`] call.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Respond with this HTTP status.
    Status(u16),
    /// Fail with this error.
    Error(TransportError),
    /// Wait, then produce the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience: wrap any reply with a delay.
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// [`EventTransport`] that replays scripted replies in order, then repeats
/// its fallback reply.
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    call_count: AtomicUsize,
    bodies: Mutex<Vec<String>>,
}

impl MockTransport {
    /// Replay `replies`, then answer 200.
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: MockReply::Status(200),
            call_count: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `reply`.
    pub fn always(reply: MockReply) -> Self {
        Self {
            fallback: reply,
            ..Self::new(Vec::new())
        }
    }

    /// Number of `post` calls so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request body received, in order.
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().clone()
    }

    /// The last request body parsed as JSON.
    pub fn last_body_json(&self) -> Option<Value> {
        let bodies = self.bodies.lock();
        serde_json::from_str(bodies.last()?).ok()
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    async fn post(&self, _url: &str, body: String) -> Result<u16, TransportError> {
        let _ = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().push(body);

        let mut reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        loop {
            match reply {
                MockReply::Status(status) => return Ok(status),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// [`BeaconTransport`] that records payloads instead of sending them.
#[derive(Debug)]
pub struct MockBeacon {
    supported: bool,
    accept: bool,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl MockBeacon {
    /// Supported and accepts everything.
    pub fn accepting() -> Self {
        Self::with(true, true)
    }

    /// Supported but refuses everything.
    pub fn rejecting() -> Self {
        Self::with(true, false)
    }

    /// Not available.
    pub fn unsupported() -> Self {
        Self::with(false, false)
    }

    fn with(supported: bool, accept: bool) -> Self {
        Self {
            supported,
            accept,
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Payloads accepted so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }
}

impl BeaconTransport for MockBeacon {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn send_beacon(&self, _url: &str, payload: Vec<u8>) -> bool {
        if self.supported && self.accept {
            self.payloads.lock().push(payload);
            true
        } else {
            false
        }
    }
}
