// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::EventSink;
use crate::checkpoint::CheckpointStore;
use crate::engine::core::Scheduler;
use crate::engine::{Command, RunReport, RuntimeOptions, SchedulerEvent, SchedulerStep};
use crate::errors::Result;
use crate::exec::WorkerBackend;

/// Drives the scheduler core in response to worker signals and timer ticks,
/// and delegates actual execution to a `WorkerBackend`.
///
/// This is a pure IO shell around [`Scheduler`], which contains all the
/// coordination semantics. This struct handles async IO: reading signals
/// from the event channel, dispatching assignments, publishing bus events,
/// and persisting checkpoints.
pub struct Runtime<W: WorkerBackend, C: CheckpointStore> {
    scheduler: Scheduler,
    event_rx: mpsc::Receiver<SchedulerEvent>,
    backend: W,
    checkpoints: C,
    sink: Arc<dyn EventSink>,
    options: RuntimeOptions,
    /// Recovery step produced by `Scheduler::restore`, executed in place of
    /// a fresh `start` when resuming.
    initial: Option<SchedulerStep>,
}

impl<W: WorkerBackend, C: CheckpointStore> fmt::Debug for Runtime<W, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<W: WorkerBackend, C: CheckpointStore> Runtime<W, C> {
    /// Runtime for a fresh run.
    pub fn new(
        scheduler: Scheduler,
        event_rx: mpsc::Receiver<SchedulerEvent>,
        backend: W,
        checkpoints: C,
        sink: Arc<dyn EventSink>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            event_rx,
            backend,
            checkpoints,
            sink,
            options,
            initial: None,
        }
    }

    /// Runtime for a run restored from a checkpoint. `initial` is the
    /// recovery step returned by [`Scheduler::restore`].
    pub fn resumed(
        scheduler: Scheduler,
        initial: SchedulerStep,
        event_rx: mpsc::Receiver<SchedulerEvent>,
        backend: W,
        checkpoints: C,
        sink: Arc<dyn EventSink>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            event_rx,
            backend,
            checkpoints,
            sink,
            options,
            initial: Some(initial),
        }
    }

    /// Main event loop.
    ///
    /// - Seeds the run (fresh start or checkpoint recovery).
    /// - Feeds worker signals and poll ticks into the core.
    /// - Executes the commands returned by the core.
    /// - Persists checkpoints on the configured interval (the core also
    ///   requests off-interval saves on terminal transitions).
    pub async fn run(mut self) -> Result<RunReport> {
        info!(run_id = %self.scheduler.run_id(), "flowdag runtime started");

        let step = match self.initial.take() {
            Some(step) => step,
            None => self.scheduler.start(Instant::now()),
        };
        // Make the run resumable from the very beginning.
        self.save_checkpoint()?;

        let mut finished = self.execute_step(step).await?;

        let mut tick = tokio::time::interval(self.options.tick_interval);
        let mut checkpoint_tick = tokio::time::interval(self.options.checkpoint_interval);

        while !finished {
            let step = tokio::select! {
                maybe_event = self.event_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            debug!(?event, "runtime received signal");
                            self.scheduler.handle_event(event, Instant::now())
                        }
                        None => {
                            info!("signal channel closed; stopping runtime");
                            break;
                        }
                    }
                }
                _ = tick.tick() => self.scheduler.handle_tick(Instant::now()),
                _ = checkpoint_tick.tick() => {
                    self.save_checkpoint()?;
                    continue;
                }
            };

            finished = self.execute_step(step).await?;
        }

        let report = self.scheduler.report();
        info!(
            run_id = %report.run_id,
            status = %report.status,
            "runtime exiting"
        );
        Ok(report)
    }

    /// Execute the commands of a single step. Returns whether the run
    /// settled in this step.
    async fn execute_step(&mut self, step: SchedulerStep) -> Result<bool> {
        for command in step.commands {
            match command {
                Command::Dispatch(assignments) => {
                    let names: Vec<_> =
                        assignments.iter().map(|a| a.task.as_str()).collect();
                    debug!(?names, "handing assignments to backend");
                    self.backend.dispatch(assignments).await?;
                }
                Command::CancelAttempt { task, epoch } => {
                    self.backend.cancel(&task, epoch);
                }
                Command::Publish(event) => {
                    self.sink.publish(&event);
                }
                Command::PersistCheckpoint => {
                    self.save_checkpoint()?;
                }
            }
        }

        Ok(step.run_finished.is_some())
    }

    fn save_checkpoint(&mut self) -> Result<()> {
        self.checkpoints.save(&self.scheduler.checkpoint())
    }
}
