// src/state/record.rs

//! Task lifecycle states and per-task bookkeeping.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::dag::TaskSpec;
use crate::engine::WorkerId;

/// Lifecycle state of a task.
///
/// `Completed`, `Failed` and `Cancelled` are terminal. A task whose
/// dependency failed permanently stays `Pending` forever and is reported as
/// blocked at run close; there is deliberately no separate state for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for dependencies to complete.
    Pending,
    /// All dependencies completed; waiting for a worker and a dispatch slot.
    Ready,
    /// Handed to a worker; start not yet acknowledged.
    Dispatched,
    /// Worker acknowledged start and is executing.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Exhausted its attempts. Terminal.
    Failed,
    /// Waiting out a backoff delay before re-entering `Ready`.
    Retrying,
    /// The attempt's deadline elapsed; the dispatch record is invalidated.
    TimedOut,
    /// The run was cancelled before this task finished. Terminal.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether a task in this state still holds (or may still hold) a
    /// dispatch slot or is otherwise making progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskState::Ready
                | TaskState::Dispatched
                | TaskState::Running
                | TaskState::Retrying
                | TaskState::TimedOut
        )
    }

    /// Central legality table for state transitions.
    ///
    /// Results are accepted while still `Dispatched` because a fast worker's
    /// completion can overtake its own start ack on the event channel.
    pub fn can_transition(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Pending, Ready) => true,
            (Ready, Dispatched) => true,
            (Dispatched, Running) => true,
            (Dispatched | Running, Completed | Retrying | Failed | TimedOut) => true,
            (TimedOut, Retrying | Failed) => true,
            (Retrying, Ready) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Dispatched => "dispatched",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::TimedOut => "timed_out",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Aggregate status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Succeeded,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Ephemeral association between an in-flight task and the worker executing
/// it. Exists only while the task is `Dispatched`/`Running`.
///
/// The `epoch` distinguishes successive attempts of the same task: a worker
/// signal tagged with a superseded epoch never changes task state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub worker: WorkerId,
    pub epoch: u32,
    pub deadline: Instant,
}

/// Per-task runtime bookkeeping. Owned by the [`super::StateStore`].
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub spec: TaskSpec,
    pub state: TaskState,
    /// Attempts consumed so far. Incremented when a dispatch begins.
    pub attempts: u32,
    /// Monotonically increasing attempt epoch; bumped with each dispatch.
    pub epoch: u32,
    /// Result payload, set once on `Completed` and never mutated again.
    pub result: Option<serde_json::Value>,
    /// Last error description, set on failure or timeout.
    pub error: Option<String>,
    /// In-flight dispatch record, if any.
    pub dispatch: Option<DispatchRecord>,
    /// When a `Retrying` task becomes `Ready` again.
    pub retry_at: Option<Instant>,
}

impl TaskRecord {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            state: TaskState::Pending,
            attempts: 0,
            epoch: 0,
            result: None,
            error: None,
            dispatch: None,
            retry_at: None,
        }
    }

    /// Whether this record's budget allows another attempt.
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.spec.max_attempts
    }
}
