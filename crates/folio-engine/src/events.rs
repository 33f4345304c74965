//! Optional lifecycle event bus.
//!
//! The scheduler and the loop announce milestones (`task:added`,
//! `loop:fixedUpdate`, ...) through an [`EventBus`]. The bus is a cheap,
//! cloneable handle to an optional [`EventSink`]; with no sink attached every
//! `emit` is a no-op, so the runtime works the same with or without a
//! diagnostics layer listening.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;

pub const TASK_ADDED: &str = "task:added";
pub const TASK_REMOVED: &str = "task:removed";
pub const TASK_ERROR: &str = "task:error";
pub const TASK_GROUP_TOGGLE: &str = "taskGroup:toggle";
pub const LOOP_STARTED: &str = "loop:started";
pub const LOOP_STOPPED: &str = "loop:stopped";
pub const LOOP_FIXED_UPDATE: &str = "loop:fixedUpdate";
pub const LOOP_VARIABLE_UPDATE: &str = "loop:variableUpdate";

/// Receiver of runtime lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: &Value);
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handle to an optional [`EventSink`].
#[derive(Clone, Default)]
pub struct EventBus {
    sink: Option<Arc<dyn EventSink>>,
}

impl EventBus {
    /// A bus with no sink; every emit is dropped.
    pub fn detached() -> Self {
        Self { sink: None }
    }

    /// A bus forwarding to `sink`.
    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    pub fn emit(&self, event: &str, payload: Value) {
        if let Some(sink) = &self.sink {
            sink.emit(event, &payload);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// One event captured by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub name: String,
    pub payload: Value,
}

/// In-memory sink that keeps every event it receives, in order.
///
/// Intended for a devtools panel polling recent activity, and for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().clone()
    }

    /// Names of recorded events, in order.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// How many events named `name` were recorded.
    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name == name).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedEvent>> {
        // A panicking reader cannot leave the log half-written.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: &Value) {
        self.lock().push(RecordedEvent {
            name: event.to_owned(),
            payload: payload.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
