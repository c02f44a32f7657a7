// src/engine/mod.rs

//! Coordination engine for flowdag.
//!
//! This module ties together:
//! - the task graph and state store
//! - the capability registry
//! - the scheduler control loop that reacts to:
//!   - worker start acks and results
//!   - per-attempt deadlines and retry backoffs (via the poll tick)
//!   - run cancellation
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`retry`] holds the backoff policy.

use std::time::{Duration, Instant};

use crate::bus::BusEvent;
use crate::state::RunStatus;

/// Canonical task name type used throughout the engine.
pub type TaskName = String;

/// Canonical worker identifier type.
pub type WorkerId = String;

/// Outcome of a single execution attempt, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Opaque result payload; stored on the task and never mutated again.
    Success(serde_json::Value),
    /// Failure reason; consumes the attempt and routes through retry policy.
    Failure(String),
}

/// Signals flowing into the scheduler from workers and the embedder.
///
/// Worker signals carry the attempt epoch they belong to; a signal tagged
/// with a superseded epoch is discarded without changing task state.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A worker acknowledged that it started executing the task.
    WorkerStarted { task: TaskName, epoch: u32 },
    /// A worker finished an attempt.
    WorkerResult {
        task: TaskName,
        epoch: u32,
        outcome: WorkerOutcome,
    },
    /// Cancel the whole run: every non-terminal task becomes `Cancelled`,
    /// in-flight workers are signalled best-effort.
    CancelRun,
}

/// A task handed to a worker: everything the worker needs to execute one
/// attempt, plus the epoch it must tag its signals with.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task: TaskName,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub worker: WorkerId,
    pub epoch: u32,
    /// Wall-clock budget for this attempt. The scheduler enforces the
    /// deadline on its poll tick; this is advisory for the worker.
    pub timeout: Duration,
    /// Absolute deadline as seen by the scheduler.
    pub deadline: Instant,
}

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum Command {
    /// Hand these assignments to the worker backend.
    Dispatch(Vec<Assignment>),
    /// Best-effort cancel an in-flight attempt, on run cancellation or when
    /// its deadline expires. Any late signal from it is stale by epoch and
    /// will be discarded regardless.
    CancelAttempt { task: TaskName, epoch: u32 },
    /// Publish a lifecycle event on the bus.
    Publish(BusEvent),
    /// Persist a checkpoint now (terminal transitions are never allowed to
    /// be lost, so the core requests an off-interval save for them).
    PersistCheckpoint,
}

/// Decision returned by the core after handling a single event or tick.
#[derive(Debug, Clone)]
pub struct SchedulerStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<Command>,
    /// Set when this step settled the run; the shell should close down.
    pub run_finished: Option<RunStatus>,
}

impl SchedulerStep {
    pub fn empty() -> Self {
        Self {
            commands: Vec::new(),
            run_finished: None,
        }
    }
}

/// Scheduling policy knobs consumed by the core.
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    /// Worker-concurrency ceiling: fixed pool of dispatch slots.
    pub max_parallel: usize,
    /// Backoff policy between `Retrying` and `Ready` re-entry.
    pub retry: retry::RetryPolicy,
    /// Scheduling passes a ready task may sit unmatched before a run-level
    /// warning is published.
    pub unmatched_pass_limit: u32,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            retry: retry::RetryPolicy::default(),
            unmatched_pass_limit: 10,
        }
    }
}

/// Options used by the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Poll tick driving deadline and backoff checks.
    pub tick_interval: Duration,
    /// Fixed interval between periodic checkpoints.
    pub checkpoint_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            checkpoint_interval: Duration::from_secs(10),
        }
    }
}

/// Final report for a settled run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub completed: Vec<TaskName>,
    pub failed: Vec<TaskName>,
    /// Tasks left permanently `Pending` because a transitive dependency
    /// failed or was cancelled.
    pub blocked: Vec<TaskName>,
    pub cancelled: Vec<TaskName>,
}

pub mod core;
pub mod retry;
pub mod runtime;

pub use self::core::Scheduler;
pub use retry::RetryPolicy;
pub use runtime::Runtime;
