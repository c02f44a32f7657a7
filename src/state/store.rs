// src/state/store.rs

//! The single-writer state store.
//!
//! All task state mutation in the crate goes through [`StateStore::transition`],
//! which validates the move against the central legality table. Readers
//! (readiness queries, checkpointing, the run report) observe a consistent
//! view; no caller holds task state of its own.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use tracing::debug;

use crate::checkpoint::TaskSnapshot;
use crate::dag::TaskGraph;
use crate::engine::{TaskName, WorkerId};
use crate::errors::{FlowdagError, Result};
use crate::state::record::{DispatchRecord, TaskRecord, TaskState};

/// A validated state transition, as applied by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub task: TaskName,
    pub from: TaskState,
    pub to: TaskState,
}

/// Per-state task counts, for logging and the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub ready: usize,
    pub dispatched: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub timed_out: usize,
    pub cancelled: usize,
}

/// Authoritative mapping from task name to lifecycle state and bookkeeping.
#[derive(Debug)]
pub struct StateStore {
    records: HashMap<TaskName, TaskRecord>,
    /// Number of not-yet-completed dependencies per task. Decremented via the
    /// graph's dependents index, so completing one task re-examines only its
    /// direct dependents.
    deps_remaining: HashMap<TaskName, usize>,
}

impl StateStore {
    /// Fresh store for a new run: every task `Pending`, counters from the graph.
    pub fn new(graph: &TaskGraph) -> Self {
        let mut records = HashMap::new();
        let mut deps_remaining = HashMap::new();

        for spec in graph.specs() {
            deps_remaining.insert(spec.name.clone(), spec.after.len());
            records.insert(spec.name.clone(), TaskRecord::new(spec.clone()));
        }

        Self {
            records,
            deps_remaining,
        }
    }

    pub fn get(&self, task: &str) -> Option<&TaskRecord> {
        self.records.get(task)
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.values()
    }

    /// Apply a legality-checked state transition.
    pub fn transition(&mut self, task: &str, to: TaskState) -> Result<Transition> {
        let record = self
            .records
            .get_mut(task)
            .ok_or_else(|| FlowdagError::TaskNotFound(task.to_string()))?;

        let from = record.state;
        if !from.can_transition(to) {
            return Err(FlowdagError::IllegalTransition {
                task: task.to_string(),
                from,
                to,
            });
        }

        record.state = to;
        debug!(task = %task, %from, %to, "state transition");

        Ok(Transition {
            task: task.to_string(),
            from,
            to,
        })
    }

    /// Begin a dispatch: `Ready -> Dispatched`, consuming an attempt and
    /// advancing the attempt epoch. The dispatch record carries the deadline
    /// and the epoch used to discard stale worker signals later.
    pub fn begin_dispatch(
        &mut self,
        task: &str,
        worker: WorkerId,
        deadline: Instant,
    ) -> Result<(Transition, u32)> {
        let transition = self.transition(task, TaskState::Dispatched)?;

        let record = self
            .records
            .get_mut(task)
            .ok_or_else(|| FlowdagError::TaskNotFound(task.to_string()))?;
        record.attempts += 1;
        record.epoch += 1;
        record.retry_at = None;
        record.dispatch = Some(DispatchRecord {
            worker,
            epoch: record.epoch,
            deadline,
        });

        Ok((transition, record.epoch))
    }

    /// Remove and return the in-flight dispatch record, if any. Called
    /// atomically with the transition that leaves `Dispatched`/`Running` so
    /// slot accounting cannot leak.
    pub fn invalidate_dispatch(&mut self, task: &str) -> Option<DispatchRecord> {
        self.records.get_mut(task).and_then(|r| r.dispatch.take())
    }

    /// Record a successful result payload. Set once; completed results are
    /// never mutated again.
    pub fn record_result(&mut self, task: &str, result: serde_json::Value) {
        if let Some(record) = self.records.get_mut(task) {
            record.result = Some(result);
        }
    }

    /// Record the most recent error description for a task.
    pub fn record_error(&mut self, task: &str, error: impl Into<String>) {
        if let Some(record) = self.records.get_mut(task) {
            record.error = Some(error.into());
        }
    }

    /// Park a `Retrying` task until `at`.
    pub fn schedule_retry(&mut self, task: &str, at: Instant) {
        if let Some(record) = self.records.get_mut(task) {
            record.retry_at = Some(at);
        }
    }

    /// `Retrying` tasks whose backoff has elapsed.
    pub fn due_retries(&self, now: Instant) -> Vec<TaskName> {
        let mut due: Vec<&TaskRecord> = self
            .records
            .values()
            .filter(|r| {
                r.state == TaskState::Retrying
                    && r.retry_at.map(|at| at <= now).unwrap_or(true)
            })
            .collect();
        due.sort_by_key(|r| r.retry_at);
        due.into_iter().map(|r| r.spec.name.clone()).collect()
    }

    /// In-flight tasks whose per-attempt deadline has elapsed, with the epoch
    /// of the expired attempt.
    pub fn expired_deadlines(&self, now: Instant) -> Vec<(TaskName, u32)> {
        self.records
            .values()
            .filter(|r| matches!(r.state, TaskState::Dispatched | TaskState::Running))
            .filter_map(|r| {
                let dispatch = r.dispatch.as_ref()?;
                (dispatch.deadline <= now).then(|| (r.spec.name.clone(), dispatch.epoch))
            })
            .collect()
    }

    /// Propagate a completion to the task's direct dependents.
    ///
    /// Returns the dependents whose last dependency just completed and which
    /// are still `Pending` — i.e. the tasks that should now become `Ready`.
    /// O(out-degree) per completion, not O(N).
    pub fn note_completed(&mut self, graph: &TaskGraph, task: &str) -> Vec<TaskName> {
        let mut newly_ready = Vec::new();

        for dependent in graph.dependents_of(task) {
            let Some(remaining) = self.deps_remaining.get_mut(dependent) else {
                continue;
            };
            *remaining = remaining.saturating_sub(1);

            if *remaining == 0
                && self
                    .records
                    .get(dependent)
                    .map(|r| r.state == TaskState::Pending)
                    .unwrap_or(false)
            {
                newly_ready.push(dependent.clone());
            }
        }

        newly_ready
    }

    /// `Pending` tasks with no unfinished dependencies. Non-empty only at run
    /// start or right after a checkpoint restore.
    pub fn unblocked_pending(&self) -> Vec<TaskName> {
        self.records
            .values()
            .filter(|r| {
                r.state == TaskState::Pending
                    && self
                        .deps_remaining
                        .get(&r.spec.name)
                        .map(|n| *n == 0)
                        .unwrap_or(false)
            })
            .map(|r| r.spec.name.clone())
            .collect()
    }

    /// Tasks currently in the given state.
    pub fn tasks_in_state(&self, state: TaskState) -> Vec<TaskName> {
        self.records
            .values()
            .filter(|r| r.state == state)
            .map(|r| r.spec.name.clone())
            .collect()
    }

    /// Whether no task is in an active state (ready, in flight, or retrying).
    /// `Pending` tasks may remain: they are permanently blocked by a failed
    /// or cancelled dependency.
    pub fn all_settled(&self) -> bool {
        !self.records.values().any(|r| r.state.is_active())
    }

    pub fn counts_by_state(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in self.records.values() {
            match record.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Ready => counts.ready += 1,
                TaskState::Dispatched => counts.dispatched += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Retrying => counts.retrying += 1,
                TaskState::TimedOut => counts.timed_out += 1,
                TaskState::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    /// Stable state map, used by tests to compare working sets.
    pub fn states(&self) -> BTreeMap<TaskName, TaskState> {
        self.records
            .iter()
            .map(|(name, r)| (name.clone(), r.state))
            .collect()
    }

    /// Point-in-time snapshot of every task for checkpointing.
    pub fn snapshot(&self) -> BTreeMap<TaskName, TaskSnapshot> {
        self.records
            .iter()
            .map(|(name, r)| {
                (
                    name.clone(),
                    TaskSnapshot {
                        state: r.state,
                        attempts: r.attempts,
                        epoch: r.epoch,
                        result: r.result.clone(),
                        error: r.error.clone(),
                        dispatched_to: r.dispatch.as_ref().map(|d| d.worker.clone()),
                    },
                )
            })
            .collect()
    }

    /// Rebuild a store from a checkpoint snapshot.
    ///
    /// States are restored verbatim (including `Dispatched`/`Running`; the
    /// scheduler's recovery rule rewrites those). Dependency counters are
    /// recomputed from the restored `Completed` set.
    pub fn restore(graph: &TaskGraph, snapshot: &BTreeMap<TaskName, TaskSnapshot>) -> Self {
        let mut store = Self::new(graph);

        for (name, snap) in snapshot {
            if let Some(record) = store.records.get_mut(name) {
                record.state = snap.state;
                record.attempts = snap.attempts;
                record.epoch = snap.epoch;
                record.result = snap.result.clone();
                record.error = snap.error.clone();
                // Dispatch records are not revived: worker affinity is lost
                // across a restart.
                record.dispatch = None;
                record.retry_at = None;
            }
        }

        for spec in graph.specs() {
            let remaining = spec
                .after
                .iter()
                .filter(|dep| {
                    store
                        .records
                        .get(dep.as_str())
                        .map(|r| r.state != TaskState::Completed)
                        .unwrap_or(true)
                })
                .count();
            store.deps_remaining.insert(spec.name.clone(), remaining);
        }

        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::TaskSpec;
    use std::time::Duration;

    fn graph() -> TaskGraph {
        let mut b = TaskSpec::new("b", "test");
        b.after = vec!["a".to_string()];
        TaskGraph::build(vec![TaskSpec::new("a", "test"), b]).unwrap()
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let g = graph();
        let mut store = StateStore::new(&g);
        let err = store.transition("a", TaskState::Running).unwrap_err();
        assert!(matches!(err, FlowdagError::IllegalTransition { .. }));
        // State unchanged after rejection.
        assert_eq!(store.get("a").unwrap().state, TaskState::Pending);
    }

    #[test]
    fn dispatch_consumes_attempt_and_bumps_epoch() {
        let g = graph();
        let mut store = StateStore::new(&g);
        store.transition("a", TaskState::Ready).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let (_, epoch) = store.begin_dispatch("a", "w1".to_string(), deadline).unwrap();
        assert_eq!(epoch, 1);

        let record = store.get("a").unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.dispatch.as_ref().unwrap().worker, "w1");
    }

    #[test]
    fn completion_unblocks_direct_dependents_only() {
        let g = graph();
        let mut store = StateStore::new(&g);
        store.transition("a", TaskState::Ready).unwrap();
        store
            .begin_dispatch("a", "w1".to_string(), Instant::now() + Duration::from_secs(1))
            .unwrap();
        store.transition("a", TaskState::Running).unwrap();
        store.transition("a", TaskState::Completed).unwrap();

        let ready = store.note_completed(&g, "a");
        assert_eq!(ready, vec!["b".to_string()]);
    }

    #[test]
    fn restore_recomputes_dependency_counters() {
        let g = graph();
        let mut store = StateStore::new(&g);
        store.transition("a", TaskState::Ready).unwrap();
        store
            .begin_dispatch("a", "w1".to_string(), Instant::now() + Duration::from_secs(1))
            .unwrap();
        store.transition("a", TaskState::Completed).unwrap();

        let snapshot = store.snapshot();
        let restored = StateStore::restore(&g, &snapshot);
        assert_eq!(restored.unblocked_pending(), vec!["b".to_string()]);
        assert_eq!(restored.states(), store.states());
    }
}
