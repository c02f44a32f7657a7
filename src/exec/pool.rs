// src/exec/pool.rs

//! Local worker pool backend.
//!
//! Runs [`Worker`] implementations as concurrent Tokio tasks. Each attempt
//! gets a cancel channel; the pool sends a `WorkerStarted` ack before the
//! worker future begins and a `WorkerResult` when it finishes, both tagged
//! with the attempt epoch so the scheduler can discard stale signals.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{Assignment, SchedulerEvent, TaskName};
use crate::errors::Result;
use crate::exec::backend::WorkerBackend;
use crate::exec::worker::Worker;

/// Handle for a currently in-flight attempt.
struct ActiveAttempt {
    epoch: u32,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Production backend: executes assignments on registered workers.
pub struct LocalWorkerPool {
    workers: HashMap<String, Arc<dyn Worker>>,
    event_tx: mpsc::Sender<SchedulerEvent>,
    /// At most one in-flight attempt per task; the scheduler never
    /// double-dispatches a task.
    active: HashMap<TaskName, ActiveAttempt>,
}

impl LocalWorkerPool {
    pub fn new(event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self {
            workers: HashMap::new(),
            event_tx,
            active: HashMap::new(),
        }
    }

    /// Add a worker to the pool. The caller registers the same worker's
    /// capabilities with the scheduler's registry.
    pub fn add_worker(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.id().to_string(), worker);
    }

    fn spawn_attempt(&mut self, assignment: Assignment) {
        let task = assignment.task.clone();
        let epoch = assignment.epoch;

        let Some(worker) = self.workers.get(&assignment.worker).cloned() else {
            // Registry and pool are populated from the same worker set, so
            // this indicates a wiring bug; report it as a failed attempt.
            let tx = self.event_tx.clone();
            let missing = assignment.worker.clone();
            tokio::spawn(async move {
                let _ = tx
                    .send(SchedulerEvent::WorkerResult {
                        task,
                        epoch,
                        outcome: crate::engine::WorkerOutcome::Failure(format!(
                            "worker '{missing}' not present in pool"
                        )),
                    })
                    .await;
            });
            return;
        };

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let _ = tx
                .send(SchedulerEvent::WorkerStarted {
                    task: assignment.task.clone(),
                    epoch,
                })
                .await;

            let task_name = assignment.task.clone();
            tokio::select! {
                outcome = worker.execute(assignment) => {
                    let _ = tx
                        .send(SchedulerEvent::WorkerResult {
                            task: task_name,
                            epoch,
                            outcome,
                        })
                        .await;
                }
                _ = &mut cancel_rx => {
                    // Cancelled attempt: send nothing. Any late signal would
                    // be stale by epoch anyway.
                    info!(task = %task_name, epoch, "attempt cancelled");
                }
            }
        });

        self.active.insert(
            task.clone(),
            ActiveAttempt {
                epoch,
                cancel: Some(cancel_tx),
                handle,
            },
        );
    }

    /// Drop finished bookkeeping entries.
    fn reap_finished(&mut self) {
        self.active.retain(|_, attempt| !attempt.handle.is_finished());
    }
}

impl WorkerBackend for LocalWorkerPool {
    fn dispatch(
        &mut self,
        assignments: Vec<Assignment>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.reap_finished();
            for assignment in assignments {
                debug!(
                    task = %assignment.task,
                    worker = %assignment.worker,
                    epoch = assignment.epoch,
                    "pool accepting assignment"
                );
                self.spawn_attempt(assignment);
            }
            Ok(())
        })
    }

    fn cancel(&mut self, task: &TaskName, epoch: u32) {
        if let Some(attempt) = self.active.get_mut(task) {
            if attempt.epoch == epoch {
                if let Some(cancel) = attempt.cancel.take() {
                    if cancel.send(()).is_err() {
                        debug!(task = %task, epoch, "attempt already finished while cancelling");
                    }
                }
            } else {
                debug!(
                    task = %task,
                    requested_epoch = epoch,
                    active_epoch = attempt.epoch,
                    "cancel request for superseded attempt; ignoring"
                );
            }
        }
    }
}
