// src/bus.rs

//! Lifecycle event publishing.
//!
//! The coordinator publishes `task.state_changed` and `run.completed` events
//! through an injected [`EventSink`]. The transport is external to this
//! crate: the default sink logs through `tracing`, and embedders can bridge
//! events onto whatever bus they run (the events are serde-serializable for
//! that purpose).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::TaskName;
use crate::state::{RunStatus, TaskState};

/// A lifecycle event published by the coordinator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    TaskStateChanged {
        task: TaskName,
        old_state: TaskState,
        new_state: TaskState,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: String,
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
    /// Run-level warning, e.g. a ready task that no registered worker can
    /// execute after the configured number of scheduling passes.
    RunWarning {
        run_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Where lifecycle events go. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &BusEvent);
}

/// Sink that stores every published event in memory. Intended for tests and
/// for embedders that drain events in batches.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: std::sync::Mutex<Vec<BusEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<BusEvent> {
        let mut guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }

    pub fn events(&self) -> Vec<BusEvent> {
        let guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: &BusEvent) {
        let mut guard = self.events.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(event.clone());
    }
}

/// Default sink: structured log lines via `tracing`.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &BusEvent) {
        match event {
            BusEvent::TaskStateChanged {
                task,
                old_state,
                new_state,
                ..
            } => {
                info!(task = %task, from = %old_state, to = %new_state, "task.state_changed");
            }
            BusEvent::RunCompleted { run_id, status, .. } => {
                info!(run_id = %run_id, status = %status, "run.completed");
            }
            BusEvent::RunWarning { run_id, message, .. } => {
                warn!(run_id = %run_id, "run warning: {message}");
            }
        }
    }
}
