// src/exec/backend.rs

//! Pluggable worker backend abstraction.
//!
//! The runtime talks to a `WorkerBackend` instead of spawning workers
//! directly. This makes it easy to swap in a fake backend in tests while
//! keeping the production pool implementation in [`super::pool`].

use std::future::Future;
use std::pin::Pin;

use crate::engine::{Assignment, TaskName};
use crate::errors::Result;

/// Trait abstracting how assignments are executed.
///
/// Production code uses [`super::LocalWorkerPool`]; tests provide their own
/// implementation that completes tasks synthetically.
pub trait WorkerBackend: Send {
    /// Hand the given assignments to workers.
    ///
    /// The implementation is free to:
    /// - spawn concurrent worker futures (production)
    /// - simulate execution and emit `SchedulerEvent`s directly (tests)
    ///
    /// It must eventually send a `WorkerResult` for each assignment, tagged
    /// with the assignment's epoch.
    fn dispatch(
        &mut self,
        assignments: Vec<Assignment>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Best-effort cancellation of an in-flight attempt. Late signals from
    /// the attempt are discarded by epoch, so this is an optimisation, not a
    /// correctness requirement.
    fn cancel(&mut self, task: &TaskName, epoch: u32);
}
