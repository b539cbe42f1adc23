//! Captured event records.
//!
//! An [`EventRecord`] carries the common envelope (`id`, `timestamp`,
//! `page_url`) and exactly one type-specific payload. The payload is an
//! internally tagged enum flattened into the record, so the wire shape is
//! flat:
//!
//! ```json
//! {"id":"…","timestamp":1700000000000,"page_url":"https://…","type":"click","click_data":{…}}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EventId;

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// One captured occurrence, ready to be batched.
///
/// `timestamp` is assigned when the event is enqueued and never changes
/// afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Opaque unique token.
    pub id: EventId,
    /// Enqueue time in epoch milliseconds.
    pub timestamp: i64,
    /// Location the event was captured on.
    pub page_url: String,
    /// Discriminant plus type-specific payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventRecord {
    /// The event discriminant.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Structural signature used to collapse duplicates inside a batch.
    ///
    /// Custom events, errors, vitals and session ends ignore the timestamp so
    /// repeats collapse; interaction events include it so distinct clicks or
    /// scrolls survive.
    #[must_use]
    pub fn signature(&self) -> String {
        match &self.payload {
            EventPayload::Custom { custom_event } => {
                let metadata = custom_event
                    .metadata
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default();
                format!("custom|{}|{metadata}", custom_event.name)
            }
            EventPayload::Error { error_data } => format!(
                "error|{}|{}|{}|{}",
                error_data.kind,
                error_data.message,
                error_data.filename.as_deref().unwrap_or_default(),
                error_data.line.unwrap_or_default()
            ),
            EventPayload::WebVitals { web_vitals } => {
                format!("web_vitals|{}|{}", web_vitals.kind, web_vitals.value)
            }
            EventPayload::SessionEnd { session_end_reason } => {
                format!("session_end|{session_end_reason}")
            }
            EventPayload::Click { click_data } => format!(
                "click|{}|{}|{}|{}|{}",
                self.page_url, self.timestamp, click_data.x, click_data.y, click_data.tag
            ),
            EventPayload::Scroll { scroll_data } => format!(
                "scroll|{}|{}|{}|{}|{}",
                self.page_url,
                self.timestamp,
                scroll_data.depth,
                scroll_data.direction,
                scroll_data.container_selector.as_deref().unwrap_or_default()
            ),
            EventPayload::PageView { .. } => {
                format!("page_view|{}|{}", self.page_url, self.timestamp)
            }
            EventPayload::SessionStart { .. } => {
                format!("session_start|{}|{}", self.page_url, self.timestamp)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discriminant
// ─────────────────────────────────────────────────────────────────────────────

/// Event discriminant, serialized as the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Navigation to a page.
    PageView,
    /// Pointer click.
    Click,
    /// Scroll depth milestone.
    Scroll,
    /// Session opened.
    SessionStart,
    /// Session closed.
    SessionEnd,
    /// Integrator-defined event.
    Custom,
    /// Uncaught error or rejection.
    Error,
    /// Performance vital.
    WebVitals,
}

impl EventType {
    /// Wire name of the discriminant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::Click => "click",
            Self::Scroll => "scroll",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Custom => "custom",
            Self::Error => "error",
            Self::WebVitals => "web_vitals",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Type-specific payload. The variant name is the `type` discriminant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Page navigation.
    PageView {
        /// Navigation details.
        #[serde(default)]
        page_view: PageViewData,
    },
    /// Pointer click.
    Click {
        /// Click coordinates and target element.
        click_data: ClickData,
    },
    /// Scroll depth milestone.
    Scroll {
        /// Depth and direction.
        scroll_data: ScrollData,
    },
    /// Session opened. Referrer and UTM are attached at enqueue time.
    SessionStart {
        /// Document referrer, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        referrer: Option<String>,
        /// Campaign parameters parsed from the landing URL.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        utm: Option<Utm>,
    },
    /// Session closed.
    SessionEnd {
        /// Why the session ended.
        session_end_reason: SessionEndReason,
    },
    /// Integrator-defined event.
    Custom {
        /// Name and free-form metadata.
        custom_event: CustomEventData,
    },
    /// Uncaught error or unhandled rejection.
    Error {
        /// Error details.
        error_data: ErrorData,
    },
    /// Performance vital sample.
    WebVitals {
        /// Vital type and value.
        web_vitals: WebVitalsData,
    },
}

impl EventPayload {
    /// The discriminant of this payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::PageView { .. } => EventType::PageView,
            Self::Click { .. } => EventType::Click,
            Self::Scroll { .. } => EventType::Scroll,
            Self::SessionStart { .. } => EventType::SessionStart,
            Self::SessionEnd { .. } => EventType::SessionEnd,
            Self::Custom { .. } => EventType::Custom,
            Self::Error { .. } => EventType::Error,
            Self::WebVitals { .. } => EventType::WebVitals,
        }
    }

    /// Shorthand for a custom event payload.
    #[must_use]
    pub fn custom(name: impl Into<String>, metadata: Option<Value>) -> Self {
        Self::Custom {
            custom_event: CustomEventData {
                name: name.into(),
                metadata,
            },
        }
    }

    /// Shorthand for a `session_start` payload; referrer and UTM are filled in on track.
    #[must_use]
    pub fn session_start() -> Self {
        Self::SessionStart {
            referrer: None,
            utm: None,
        }
    }

    /// Shorthand for a `session_end` payload.
    #[must_use]
    pub fn session_end(reason: SessionEndReason) -> Self {
        Self::SessionEnd {
            session_end_reason: reason,
        }
    }
}

/// Navigation details for `page_view`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageViewData {
    /// Referrer of the navigation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    /// Document title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// URL path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname: Option<String>,
    /// URL query string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// URL fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Click coordinates and target element.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickData {
    /// Viewport X.
    pub x: f64,
    /// Viewport Y.
    pub y: f64,
    /// X relative to the target element (0..1).
    #[serde(default)]
    pub relative_x: f64,
    /// Y relative to the target element (0..1).
    #[serde(default)]
    pub relative_y: f64,
    /// Target tag name.
    pub tag: String,
    /// Target element id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Target class list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Visible text (truncated by the producer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Link target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Title attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// ARIA role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// ARIA label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
}

/// Scroll direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    /// Toward the top.
    Up,
    /// Toward the bottom.
    Down,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Scroll depth milestone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrollData {
    /// Depth in percent (0..=100).
    pub depth: u8,
    /// Direction of travel.
    pub direction: ScrollDirection,
    /// Selector of a non-window scroll container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_selector: Option<String>,
    /// Whether the container is the primary scroller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,
    /// Pixels per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    /// Deepest point seen so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth_reached: Option<u8>,
}

/// Campaign parameters from the landing URL query string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utm {
    /// `utm_source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// `utm_medium`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    /// `utm_campaign`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
    /// `utm_term`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// `utm_content`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Utm {
    /// True when no campaign parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Idle timeout elapsed.
    Inactivity,
    /// The page is being unloaded.
    PageUnload,
    /// The integrator stopped tracking.
    ManualStop,
    /// A stale session left behind by a crashed tab.
    OrphanedCleanup,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactivity => "inactivity",
            Self::PageUnload => "page_unload",
            Self::ManualStop => "manual_stop",
            Self::OrphanedCleanup => "orphaned_cleanup",
        };
        f.write_str(s)
    }
}

/// Integrator-defined event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomEventData {
    /// Event name.
    pub name: String,
    /// Free-form metadata. Shape validation is the producer's concern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Uncaught script error.
    JsError,
    /// Unhandled promise rejection.
    PromiseRejection,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsError => f.write_str("js_error"),
            Self::PromiseRejection => f.write_str("promise_rejection"),
        }
    }
}

/// Error details.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error category.
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Error message.
    pub message: String,
    /// Source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Source line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Source column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

/// Performance vital type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebVitalKind {
    /// Largest Contentful Paint.
    Lcp,
    /// Cumulative Layout Shift.
    Cls,
    /// Interaction to Next Paint.
    Inp,
    /// First Contentful Paint.
    Fcp,
    /// Time to First Byte.
    Ttfb,
    /// Main-thread task over 50ms.
    LongTask,
}

impl fmt::Display for WebVitalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lcp => "LCP",
            Self::Cls => "CLS",
            Self::Inp => "INP",
            Self::Fcp => "FCP",
            Self::Ttfb => "TTFB",
            Self::LongTask => "LONG_TASK",
        };
        f.write_str(s)
    }
}

/// Performance vital sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebVitalsData {
    /// Which vital.
    #[serde(rename = "type")]
    pub kind: WebVitalKind,
    /// Measured value (ms, or unitless for CLS).
    pub value: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
