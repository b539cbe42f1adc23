//! Integrator transform hooks.
//!
//! Two optional hooks reshape outgoing data for custom destinations:
//!
//! - [`TransformHook::BeforeSend`] runs once per event. Returning `None`
//!   drops the event.
//! - [`TransformHook::BeforeBatch`] runs once on the batch that survived
//!   `BeforeSend`. Returning `None` cancels the send.
//!
//! Hooks see and return `serde_json::Value`. Output that does not parse back
//! into the expected shape, an `Err`, or a panic all fall back to the input.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;

use beacon_core::{Batch, EventRecord};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::TransformError;

/// Transform hook slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransformHook {
    /// Per-event hook.
    BeforeSend,
    /// Whole-batch hook.
    BeforeBatch,
}

impl TransformHook {
    /// Canonical hook name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeSend => "beforeSend",
            Self::BeforeBatch => "beforeBatch",
        }
    }
}

impl fmt::Display for TransformHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformHook {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beforeSend" | "before_send" => Ok(Self::BeforeSend),
            "beforeBatch" | "before_batch" => Ok(Self::BeforeBatch),
            other => Err(TransformError::UnknownHook(other.to_string())),
        }
    }
}

/// A registered hook function.
pub type Transformer =
    Arc<dyn Fn(Value) -> Result<Option<Value>, TransformError> + Send + Sync>;

/// Result of running the pipeline over a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformResult {
    /// Send this (possibly rewritten) batch.
    Send(Batch),
    /// Nothing to send: every event was dropped or the batch was cancelled.
    Skip,
}

enum HookOutcome {
    Replace(Value),
    Drop,
    Keep,
}

/// At most one function per hook; setting replaces.
#[derive(Default)]
pub struct TransformerRegistry {
    hooks: RwLock<HashMap<TransformHook, Transformer>>,
}

impl TransformerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the function for `hook`.
    pub fn set_transformer<F>(&self, hook: TransformHook, f: F)
    where
        F: Fn(Value) -> Result<Option<Value>, TransformError> + Send + Sync + 'static,
    {
        let _ = self.hooks.write().insert(hook, Arc::new(f));
        debug!(hook = %hook, "transformer registered");
    }

    /// Register by hook name. Unknown names are rejected.
    pub fn set_transformer_named<F>(&self, hook: &str, f: F) -> Result<(), TransformError>
    where
        F: Fn(Value) -> Result<Option<Value>, TransformError> + Send + Sync + 'static,
    {
        let hook = hook.parse()?;
        self.set_transformer(hook, f);
        Ok(())
    }

    /// Remove the function for `hook`. No-op when unset.
    pub fn remove_transformer(&self, hook: TransformHook) {
        if self.hooks.write().remove(&hook).is_some() {
            debug!(hook = %hook, "transformer removed");
        }
    }

    /// Remove every hook.
    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    /// Whether `hook` has a function.
    pub fn is_set(&self, hook: TransformHook) -> bool {
        self.hooks.read().contains_key(&hook)
    }

    fn get(&self, hook: TransformHook) -> Option<Transformer> {
        self.hooks.read().get(&hook).cloned()
    }

    /// Run both hooks over `batch`.
    pub fn apply(&self, batch: &Batch) -> TransformResult {
        let before_send = self.get(TransformHook::BeforeSend);
        let before_batch = self.get(TransformHook::BeforeBatch);
        if before_send.is_none() && before_batch.is_none() {
            return TransformResult::Send(batch.clone());
        }

        let events = match &before_send {
            Some(f) => batch
                .events
                .iter()
                .filter_map(|record| transform_record(f, record))
                .collect(),
            None => batch.events.clone(),
        };
        if events.is_empty() {
            debug!(input = batch.len(), "all events dropped by beforeSend");
            return TransformResult::Skip;
        }

        let candidate = Batch {
            events,
            ..batch.clone()
        };
        let Some(f) = before_batch else {
            return TransformResult::Send(candidate);
        };

        let input = match serde_json::to_value(&candidate) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "could not serialize batch for beforeBatch");
                return TransformResult::Send(candidate);
            }
        };
        match run_hook(TransformHook::BeforeBatch, &f, input) {
            HookOutcome::Drop => {
                debug!("batch cancelled by beforeBatch");
                TransformResult::Skip
            }
            HookOutcome::Keep => TransformResult::Send(candidate),
            HookOutcome::Replace(value) => match parse_batch(value) {
                Some(out) if out.is_empty() => TransformResult::Skip,
                Some(out) => TransformResult::Send(out),
                None => {
                    warn!("beforeBatch returned an invalid batch, using input");
                    TransformResult::Send(candidate)
                }
            },
        }
    }
}

impl fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: Vec<TransformHook> = self.hooks.read().keys().copied().collect();
        f.debug_struct("TransformerRegistry")
            .field("hooks", &hooks)
            .finish()
    }
}

fn transform_record(f: &Transformer, record: &EventRecord) -> Option<EventRecord> {
    let input = match serde_json::to_value(record) {
        Ok(v) => v,
        Err(e) => {
            warn!(event_id = %record.id, error = %e, "could not serialize event for beforeSend");
            return Some(record.clone());
        }
    };
    match run_hook(TransformHook::BeforeSend, f, input) {
        HookOutcome::Drop => None,
        HookOutcome::Keep => Some(record.clone()),
        HookOutcome::Replace(value) => Some(parse_record(value).unwrap_or_else(|| {
            warn!(event_id = %record.id, "beforeSend returned an invalid event, using original");
            record.clone()
        })),
    }
}

fn run_hook(hook: TransformHook, f: &Transformer, input: Value) -> HookOutcome {
    match catch_unwind(AssertUnwindSafe(|| f(input))) {
        Ok(Ok(Some(value))) => HookOutcome::Replace(value),
        Ok(Ok(None)) => HookOutcome::Drop,
        Ok(Err(e)) => {
            warn!(hook = %hook, error = %e, "transformer failed, using input");
            HookOutcome::Keep
        }
        Err(_) => {
            warn!(hook = %hook, "transformer panicked, using input");
            HookOutcome::Keep
        }
    }
}

fn parse_record(value: Value) -> Option<EventRecord> {
    let has_type = value
        .as_object()
        .and_then(|o| o.get("type"))
        .is_some_and(Value::is_string);
    if !has_type {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn parse_batch(value: Value) -> Option<Batch> {
    let has_events = value
        .as_object()
        .and_then(|o| o.get("events"))
        .is_some_and(Value::is_array);
    if !has_events {
        return None;
    }
    serde_json::from_value(value).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
