// src/engine/core.rs

//! Pure scheduler core.
//!
//! This module contains a synchronous, deterministic control loop that
//! consumes [`SchedulerEvent`]s (plus a caller-supplied `Instant` for
//! deadline/backoff arithmetic) and produces:
//! - updated task state, held exclusively by the [`StateStore`]
//! - a list of [`Command`]s describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading worker signals from channels
//! - handing assignments to the worker backend
//! - driving the poll tick and checkpoint interval
//! - persisting checkpoints and publishing bus events
//!
//! The core is intended to be extensively tested without any Tokio,
//! channels, filesystem, or real workers.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::bus::BusEvent;
use crate::checkpoint::Checkpoint;
use crate::dag::TaskGraph;
use crate::engine::{
    Assignment, Command, RunReport, SchedulerEvent, SchedulerPolicy, SchedulerStep, TaskName,
    WorkerOutcome,
};
use crate::registry::CapabilityRegistry;
use crate::state::{RunStatus, StateStore, TaskState};

/// The control loop core: pulls ready tasks from the graph, dispatches them
/// to capability-matched workers, applies timeout/retry policy, and closes
/// the run when every task has settled.
///
/// Logically single-threaded: all transitions are serialized through the
/// state store, so readiness recomputation never races dispatch decisions.
#[derive(Debug)]
pub struct Scheduler {
    run_id: String,
    graph: TaskGraph,
    store: StateStore,
    registry: CapabilityRegistry,
    policy: SchedulerPolicy,
    /// Dispatch slots currently held by in-flight tasks.
    slots_in_use: usize,
    status: RunStatus,
    cancelled: bool,
    /// Scheduling passes each ready task has sat unmatched.
    unmatched_passes: HashMap<TaskName, u32>,
    warned_unmatched: HashSet<TaskName>,
}

impl Scheduler {
    pub fn new(
        run_id: impl Into<String>,
        graph: TaskGraph,
        registry: CapabilityRegistry,
        policy: SchedulerPolicy,
    ) -> Self {
        let store = StateStore::new(&graph);
        Self {
            run_id: run_id.into(),
            graph,
            store,
            registry,
            policy,
            slots_in_use: 0,
            status: RunStatus::InProgress,
            cancelled: false,
            unmatched_passes: HashMap::new(),
            warned_unmatched: HashSet::new(),
        }
    }

    /// Reconstruct the working set from a checkpoint.
    ///
    /// The single recovery rule: every task that was `Dispatched`/`Running`
    /// in the checkpoint is treated as timed out immediately (its worker
    /// affinity is lost) and re-enters the retry/fail path per normal
    /// policy. Completed work is never re-dispatched. The returned step
    /// carries the recovery transitions and any immediate dispatches.
    pub fn restore(
        graph: TaskGraph,
        registry: CapabilityRegistry,
        policy: SchedulerPolicy,
        checkpoint: &Checkpoint,
        now: Instant,
    ) -> (Self, SchedulerStep) {
        let store = StateStore::restore(&graph, &checkpoint.tasks);
        let mut registry = registry;
        registry.reset_load();

        // A cancelled run stays cancelled across a restart; resuming must
        // not relabel it.
        let cancelled = checkpoint.status == RunStatus::Cancelled;

        let mut scheduler = Self {
            run_id: checkpoint.run_id.clone(),
            graph,
            store,
            registry,
            policy,
            slots_in_use: 0,
            status: RunStatus::InProgress,
            cancelled,
            unmatched_passes: HashMap::new(),
            warned_unmatched: HashSet::new(),
        };

        let mut commands = Vec::new();

        let in_flight = [
            scheduler.store.tasks_in_state(TaskState::Dispatched),
            scheduler.store.tasks_in_state(TaskState::Running),
        ]
        .concat();

        for task in in_flight {
            info!(task = %task, "in-flight at checkpoint; treating as timed out");
            scheduler
                .store
                .record_error(&task, "attempt lost across restart");
            scheduler.apply(&task, TaskState::TimedOut, &mut commands);
            scheduler.retry_or_fail(&task, now, &mut commands);
        }

        // Retrying tasks lost their in-memory wake-up time; re-derive it
        // from attempt count.
        for task in scheduler.store.tasks_in_state(TaskState::Retrying) {
            let attempts = scheduler.attempts_of(&task);
            let delay = scheduler.policy.retry.next_delay(attempts);
            scheduler.store.schedule_retry(&task, now + delay);
        }

        // A checkpoint is only taken between pumps, so Pending tasks with no
        // remaining dependencies should not occur; promote defensively.
        for task in scheduler.store.unblocked_pending() {
            scheduler.apply(&task, TaskState::Ready, &mut commands);
        }

        scheduler.dispatch_ready(now, &mut commands);
        let run_finished = scheduler.maybe_finish(&mut commands);

        (
            scheduler,
            SchedulerStep {
                commands,
                run_finished,
            },
        )
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Read-only view of the authoritative state.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Begin the run: promote dependency-free tasks to `Ready` and dispatch
    /// up to the concurrency ceiling.
    pub fn start(&mut self, now: Instant) -> SchedulerStep {
        let mut commands = Vec::new();

        for task in self.store.unblocked_pending() {
            self.apply(&task, TaskState::Ready, &mut commands);
        }

        self.dispatch_ready(now, &mut commands);
        let run_finished = self.maybe_finish(&mut commands);

        SchedulerStep {
            commands,
            run_finished,
        }
    }

    /// Handle a single scheduler event.
    pub fn handle_event(&mut self, event: SchedulerEvent, now: Instant) -> SchedulerStep {
        let mut commands = Vec::new();

        match event {
            SchedulerEvent::WorkerStarted { task, epoch } => {
                self.handle_started(&task, epoch, &mut commands);
            }
            SchedulerEvent::WorkerResult {
                task,
                epoch,
                outcome,
            } => {
                self.handle_result(&task, epoch, outcome, now, &mut commands);
            }
            SchedulerEvent::CancelRun => {
                self.cancel_run(&mut commands);
            }
        }

        self.pump(now, &mut commands);
        let run_finished = self.maybe_finish(&mut commands);

        SchedulerStep {
            commands,
            run_finished,
        }
    }

    /// Poll tick: expire deadlines, promote elapsed backoffs, dispatch.
    pub fn handle_tick(&mut self, now: Instant) -> SchedulerStep {
        let mut commands = Vec::new();
        self.pump(now, &mut commands);
        let run_finished = self.maybe_finish(&mut commands);

        SchedulerStep {
            commands,
            run_finished,
        }
    }

    /// Consistent snapshot of the run for persistence.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            run_id: self.run_id.clone(),
            status: self.status,
            taken_at: Utc::now(),
            tasks: self.store.snapshot(),
        }
    }

    /// Final report. Meaningful once the run has settled; blocked tasks are
    /// the ones left permanently `Pending` by a failed dependency.
    pub fn report(&self) -> RunReport {
        let mut completed = self.store.tasks_in_state(TaskState::Completed);
        let mut failed = self.store.tasks_in_state(TaskState::Failed);
        let mut blocked = self.store.tasks_in_state(TaskState::Pending);
        let mut cancelled = self.store.tasks_in_state(TaskState::Cancelled);
        completed.sort();
        failed.sort();
        blocked.sort();
        cancelled.sort();

        RunReport {
            run_id: self.run_id.clone(),
            status: self.status,
            completed,
            failed,
            blocked,
            cancelled,
        }
    }

    // ---- event handling ----

    fn handle_started(&mut self, task: &str, epoch: u32, commands: &mut Vec<Command>) {
        if !self.signal_is_current(task, epoch) {
            return;
        }

        let state = self.store.get(task).map(|r| r.state);
        if state == Some(TaskState::Dispatched) {
            self.apply(task, TaskState::Running, commands);
        } else {
            // Start ack raced its own result or a timeout; nothing to do.
            debug!(task = %task, epoch, ?state, "ignoring start ack");
        }
    }

    fn handle_result(
        &mut self,
        task: &str,
        epoch: u32,
        outcome: WorkerOutcome,
        now: Instant,
        commands: &mut Vec<Command>,
    ) {
        if !self.signal_is_current(task, epoch) {
            return;
        }

        self.release_dispatch(task);

        match outcome {
            WorkerOutcome::Success(result) => {
                self.store.record_result(task, result);
                self.apply(task, TaskState::Completed, commands);
                self.propagate_completion(task, commands);
            }
            WorkerOutcome::Failure(reason) => {
                warn!(task = %task, attempt = self.attempts_of(task), %reason, "attempt failed");
                self.store.record_error(task, reason);
                self.retry_or_fail(task, now, commands);
            }
        }
    }

    /// Whether a worker signal belongs to the task's current in-flight
    /// attempt. Late signals from superseded attempts are discarded here —
    /// logged only, never a state change.
    fn signal_is_current(&self, task: &str, epoch: u32) -> bool {
        let Some(record) = self.store.get(task) else {
            warn!(task = %task, "signal for unknown task; ignoring");
            return false;
        };

        let current = record
            .dispatch
            .as_ref()
            .map(|d| d.epoch == epoch)
            .unwrap_or(false);

        if !current {
            debug!(
                task = %task,
                signal_epoch = epoch,
                task_epoch = record.epoch,
                state = %record.state,
                "stale worker signal; discarding"
            );
        }
        current
    }

    fn cancel_run(&mut self, commands: &mut Vec<Command>) {
        info!(run_id = %self.run_id, "run cancellation requested");
        self.cancelled = true;

        for task in self.graph.tasks().map(str::to_string).collect::<Vec<_>>() {
            let Some(record) = self.store.get(&task) else {
                continue;
            };
            if record.state.is_terminal() {
                continue;
            }

            if let Some(dispatch) = self.store.get(&task).and_then(|r| r.dispatch.clone()) {
                commands.push(Command::CancelAttempt {
                    task: task.clone(),
                    epoch: dispatch.epoch,
                });
            }
            self.release_dispatch(&task);
            self.apply(&task, TaskState::Cancelled, commands);
        }
    }

    // ---- the pump ----

    fn pump(&mut self, now: Instant, commands: &mut Vec<Command>) {
        self.promote_retries(now, commands);
        self.expire_deadlines(now, commands);
        self.dispatch_ready(now, commands);
    }

    fn promote_retries(&mut self, now: Instant, commands: &mut Vec<Command>) {
        for task in self.store.due_retries(now) {
            self.apply(&task, TaskState::Ready, commands);
        }
    }

    fn expire_deadlines(&mut self, now: Instant, commands: &mut Vec<Command>) {
        for (task, epoch) in self.store.expired_deadlines(now) {
            warn!(task = %task, epoch, "attempt deadline elapsed");
            // Reap the orphaned worker; its late signal would be stale by
            // epoch anyway, but there is no reason to let it keep running
            // alongside the retry.
            commands.push(Command::CancelAttempt {
                task: task.clone(),
                epoch,
            });
            self.release_dispatch(&task);
            self.store.record_error(&task, "attempt deadline elapsed");
            self.apply(&task, TaskState::TimedOut, commands);
            self.retry_or_fail(&task, now, commands);
        }
    }

    /// Dispatch ready tasks in (priority desc, declaration order) up to the
    /// concurrency ceiling. Tasks beyond the ceiling or without a capable
    /// worker stay `Ready` — backpressure, not failure.
    fn dispatch_ready(&mut self, now: Instant, commands: &mut Vec<Command>) {
        let mut ready = self.store.tasks_in_state(TaskState::Ready);
        ready.sort_by_key(|name| {
            let priority = self
                .store
                .get(name)
                .map(|r| r.spec.priority)
                .unwrap_or_default();
            (std::cmp::Reverse(priority), self.graph.order_of(name))
        });

        let mut assignments = Vec::new();

        for task in ready {
            if self.slots_in_use >= self.policy.max_parallel {
                debug!(
                    task = %task,
                    slots = self.slots_in_use,
                    "concurrency ceiling reached; task stays ready"
                );
                break;
            }

            let Some(record) = self.store.get(&task) else {
                continue;
            };
            let (task_type, timeout, payload) = (
                record.spec.task_type.clone(),
                record.spec.timeout,
                record.spec.payload.clone(),
            );

            let Some(worker) = self.registry.match_worker(&task_type).cloned() else {
                self.note_unmatched(&task, &task_type, commands);
                continue;
            };

            let deadline = now + timeout;
            match self.store.begin_dispatch(&task, worker.clone(), deadline) {
                Ok((transition, epoch)) => {
                    self.slots_in_use += 1;
                    self.registry.note_dispatched(&worker);
                    self.unmatched_passes.remove(&task);
                    commands.push(self.publish_transition(&transition));

                    info!(
                        task = %task,
                        worker = %worker,
                        epoch,
                        attempt = self.attempts_of(&task),
                        "dispatching task"
                    );

                    assignments.push(Assignment {
                        task: task.clone(),
                        task_type,
                        payload,
                        worker,
                        epoch,
                        timeout,
                        deadline,
                    });
                }
                Err(e) => {
                    error!(task = %task, error = %e, "dispatch bookkeeping failed");
                }
            }
        }

        if !assignments.is_empty() {
            commands.push(Command::Dispatch(assignments));
        }
    }

    /// Bounded-pass escalation for a ready task no worker can execute. The
    /// task never loses an attempt (it never started); it is re-matched on
    /// every pass.
    fn note_unmatched(&mut self, task: &str, task_type: &str, commands: &mut Vec<Command>) {
        let passes = self.unmatched_passes.entry(task.to_string()).or_insert(0);
        *passes += 1;

        if *passes >= self.policy.unmatched_pass_limit
            && self.warned_unmatched.insert(task.to_string())
        {
            let message = format!(
                "task '{task}' (type '{task_type}') has no capable worker after {passes} scheduling passes"
            );
            warn!(run_id = %self.run_id, "{message}");
            commands.push(Command::Publish(BusEvent::RunWarning {
                run_id: self.run_id.clone(),
                message,
                timestamp: Utc::now(),
            }));
        }
    }

    // ---- transition plumbing ----

    /// Apply a transition through the store and emit the publish command.
    /// Terminal transitions additionally request an off-interval checkpoint:
    /// completion is never allowed to be lost.
    fn apply(&mut self, task: &str, to: TaskState, commands: &mut Vec<Command>) {
        match self.store.transition(task, to) {
            Ok(transition) => {
                commands.push(self.publish_transition(&transition));
                if to.is_terminal() {
                    commands.push(Command::PersistCheckpoint);
                }
            }
            Err(e) => {
                // A rejected transition here is a scheduler bug, not a task
                // failure; surface it loudly and leave state untouched.
                error!(task = %task, error = %e, "rejected state transition");
                debug_assert!(false, "illegal transition: {e}");
            }
        }
    }

    fn publish_transition(&self, transition: &crate::state::Transition) -> Command {
        Command::Publish(BusEvent::TaskStateChanged {
            task: transition.task.clone(),
            old_state: transition.from,
            new_state: transition.to,
            timestamp: Utc::now(),
        })
    }

    /// On completion, re-examine only the direct dependents of the finished
    /// task (the dependents index keeps this O(out-degree)).
    fn propagate_completion(&mut self, task: &str, commands: &mut Vec<Command>) {
        for dependent in self.store.note_completed(&self.graph, task) {
            self.apply(&dependent, TaskState::Ready, commands);
        }
    }

    /// Route a failed or timed-out attempt: back off and retry while the
    /// budget lasts, otherwise fail permanently.
    fn retry_or_fail(&mut self, task: &str, now: Instant, commands: &mut Vec<Command>) {
        let attempts = self.attempts_of(task);
        let remaining = self
            .store
            .get(task)
            .map(|r| r.attempts_remaining())
            .unwrap_or(false);

        if remaining {
            let delay = self.policy.retry.next_delay(attempts);
            debug!(task = %task, attempts, ?delay, "scheduling retry");
            self.apply(task, TaskState::Retrying, commands);
            self.store.schedule_retry(task, now + delay);
        } else {
            warn!(task = %task, attempts, "attempts exhausted; failing permanently");
            self.apply(task, TaskState::Failed, commands);
        }
    }

    /// Release the dispatch slot and worker load held by an in-flight task.
    /// Must be called together with the transition that invalidates the
    /// dispatch record, so a crash between the two is impossible.
    fn release_dispatch(&mut self, task: &str) {
        if let Some(dispatch) = self.store.invalidate_dispatch(task) {
            self.slots_in_use = self.slots_in_use.saturating_sub(1);
            self.registry.note_released(&dispatch.worker);
        }
    }

    fn attempts_of(&self, task: &str) -> u32 {
        self.store.get(task).map(|r| r.attempts).unwrap_or(0)
    }

    /// Close the run if every task has settled.
    ///
    /// Tasks left `Pending` at this point are permanently blocked by a
    /// failed or cancelled dependency; independent subgraphs have already
    /// completed normally.
    fn maybe_finish(&mut self, commands: &mut Vec<Command>) -> Option<RunStatus> {
        if self.status != RunStatus::InProgress || !self.store.all_settled() {
            return None;
        }

        let counts = self.store.counts_by_state();
        let status = if self.cancelled || counts.cancelled > 0 {
            RunStatus::Cancelled
        } else if counts.failed == 0 && counts.pending == 0 {
            RunStatus::Succeeded
        } else if counts.completed == 0 {
            RunStatus::Failed
        } else {
            RunStatus::PartiallyFailed
        };

        self.status = status;
        info!(
            run_id = %self.run_id,
            %status,
            completed = counts.completed,
            failed = counts.failed,
            blocked = counts.pending,
            "run settled"
        );

        commands.push(Command::Publish(BusEvent::RunCompleted {
            run_id: self.run_id.clone(),
            status,
            timestamp: Utc::now(),
        }));
        commands.push(Command::PersistCheckpoint);

        Some(status)
    }
}
