// tests/checkpoint_recovery.rs
//
// Crash-recovery semantics: rebuild a scheduler from a checkpoint taken
// mid-run and check that completed work is preserved, in-flight work is
// treated as timed out, and the run continues under normal policy.

use std::time::{Duration, Instant};

use flowdag::engine::retry::RetryPolicy;
use flowdag::engine::{
    Assignment, Command, Scheduler, SchedulerEvent, SchedulerPolicy, SchedulerStep, WorkerOutcome,
};
use flowdag::state::{RunStatus, TaskState};

use flowdag_test_utils::builders::{graph_of, single_worker_registry, task, TaskSpecBuilder};
use flowdag_test_utils::init_tracing;

fn test_policy() -> SchedulerPolicy {
    SchedulerPolicy {
        max_parallel: 4,
        retry: RetryPolicy {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_secs(10),
        },
        unmatched_pass_limit: 10,
    }
}

fn assignments_of(step: &SchedulerStep) -> Vec<Assignment> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            Command::Dispatch(assignments) => Some(assignments.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn succeed(task: &str, epoch: u32) -> SchedulerEvent {
    SchedulerEvent::WorkerResult {
        task: task.to_string(),
        epoch,
        outcome: WorkerOutcome::Success(serde_json::Value::Null),
    }
}

/// Chain a -> b -> c. Run until `a` is complete and `b` is mid-flight, then
/// checkpoint. This is the canonical "crashed while b was running" snapshot.
fn checkpoint_with_b_in_flight() -> flowdag::checkpoint::Checkpoint {
    let graph = graph_of(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
    let registry = single_worker_registry("w1", &["shell"]);
    let mut scheduler = Scheduler::new("run-crash", graph, registry, test_policy());

    let now = Instant::now();
    let step = scheduler.start(now);
    let a = assignments_of(&step)[0].clone();

    let step = scheduler.handle_event(succeed("a", a.epoch), now);
    let b = assignments_of(&step)[0].clone();
    scheduler.handle_event(
        SchedulerEvent::WorkerStarted {
            task: b.task.clone(),
            epoch: b.epoch,
        },
        now,
    );

    assert_eq!(
        scheduler.store().get("b").map(|r| r.state),
        Some(TaskState::Running)
    );
    scheduler.checkpoint()
}

#[test]
fn in_flight_task_is_timed_out_and_retried_on_restore() {
    init_tracing();
    let checkpoint = checkpoint_with_b_in_flight();

    let graph = graph_of(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
    let registry = single_worker_registry("w1", &["shell"]);
    let now = Instant::now();
    let (scheduler, recovery) =
        Scheduler::restore(graph, registry, test_policy(), &checkpoint, now);

    // The lost attempt is already consumed; b waits out its backoff.
    assert_eq!(
        scheduler.store().get("b").map(|r| r.state),
        Some(TaskState::Retrying)
    );
    assert_eq!(scheduler.store().get("b").map(|r| r.attempts), Some(1));

    // Completed work must not be re-dispatched.
    assert_eq!(
        scheduler.store().get("a").map(|r| r.state),
        Some(TaskState::Completed)
    );
    assert!(assignments_of(&recovery).is_empty());
    assert!(recovery.run_finished.is_none());
}

#[test]
fn restored_run_continues_to_completion() {
    init_tracing();
    let checkpoint = checkpoint_with_b_in_flight();

    let graph = graph_of(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
    let registry = single_worker_registry("w1", &["shell"]);
    let t0 = Instant::now();
    let (mut scheduler, _recovery) =
        Scheduler::restore(graph, registry, test_policy(), &checkpoint, t0);

    // Backoff elapses; b redispatches on a fresh epoch.
    let step = scheduler.handle_tick(t0 + Duration::from_secs(1));
    let b = assignments_of(&step)[0].clone();
    assert_eq!(b.task, "b");
    assert_eq!(scheduler.store().get("b").map(|r| r.attempts), Some(2));

    let step = scheduler.handle_event(succeed("b", b.epoch), t0 + Duration::from_secs(1));
    let c = assignments_of(&step)[0].clone();
    assert_eq!(c.task, "c");

    let step = scheduler.handle_event(succeed("c", c.epoch), t0 + Duration::from_secs(1));
    assert_eq!(step.run_finished, Some(RunStatus::Succeeded));

    let report = scheduler.report();
    assert_eq!(report.run_id, "run-crash");
    assert_eq!(report.completed, vec!["a", "b", "c"]);
}

#[test]
fn in_flight_task_with_exhausted_budget_fails_on_restore() {
    init_tracing();
    let graph = graph_of(vec![
        TaskSpecBuilder::new("only").max_attempts(1).build(),
        task("next", &["only"]),
    ]);
    let registry = single_worker_registry("w1", &["shell"]);
    let mut scheduler = Scheduler::new("run-exhausted", graph, registry, test_policy());
    scheduler.start(Instant::now());
    let checkpoint = scheduler.checkpoint();

    let graph = graph_of(vec![
        TaskSpecBuilder::new("only").max_attempts(1).build(),
        task("next", &["only"]),
    ]);
    let registry = single_worker_registry("w1", &["shell"]);
    let (scheduler, recovery) =
        Scheduler::restore(graph, registry, test_policy(), &checkpoint, Instant::now());

    assert_eq!(
        scheduler.store().get("only").map(|r| r.state),
        Some(TaskState::Failed)
    );
    assert_eq!(recovery.run_finished, Some(RunStatus::Failed));
    assert_eq!(scheduler.report().blocked, vec!["next"]);
}

#[test]
fn restoring_a_cancelled_run_keeps_it_cancelled() {
    init_tracing();
    // Ctrl-C mid-run: everything non-terminal becomes Cancelled, and the
    // checkpoint records the cancelled status.
    let graph = graph_of(vec![task("a", &[]), task("b", &["a"])]);
    let registry = single_worker_registry("w1", &["shell"]);
    let mut scheduler = Scheduler::new("run-interrupted", graph, registry, test_policy());

    let now = Instant::now();
    scheduler.start(now);
    let step = scheduler.handle_event(SchedulerEvent::CancelRun, now);
    assert_eq!(step.run_finished, Some(RunStatus::Cancelled));

    let checkpoint = scheduler.checkpoint();
    assert_eq!(checkpoint.status, RunStatus::Cancelled);

    // Resuming from that checkpoint must close as Cancelled again, never
    // relabel the run or re-dispatch cancelled tasks.
    let graph = graph_of(vec![task("a", &[]), task("b", &["a"])]);
    let registry = single_worker_registry("w1", &["shell"]);
    let (scheduler, recovery) =
        Scheduler::restore(graph, registry, test_policy(), &checkpoint, Instant::now());

    assert!(assignments_of(&recovery).is_empty());
    assert_eq!(recovery.run_finished, Some(RunStatus::Cancelled));
    assert_eq!(scheduler.status(), RunStatus::Cancelled);

    let report = scheduler.report();
    assert_eq!(report.cancelled, vec!["a", "b"]);
    assert!(report.completed.is_empty());
}

#[test]
fn restore_is_idempotent_for_settled_work() {
    init_tracing();
    let checkpoint = checkpoint_with_b_in_flight();

    let restore_once = || {
        let graph = graph_of(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
        let registry = single_worker_registry("w1", &["shell"]);
        let (scheduler, _step) =
            Scheduler::restore(graph, registry, test_policy(), &checkpoint, Instant::now());
        scheduler.store().states()
    };

    assert_eq!(restore_once(), restore_once());
}

#[test]
fn checkpoint_snapshot_round_trips_through_json() {
    init_tracing();
    let checkpoint = checkpoint_with_b_in_flight();

    let json = serde_json::to_string_pretty(&checkpoint).unwrap();
    let parsed: flowdag::checkpoint::Checkpoint = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.run_id, checkpoint.run_id);
    assert_eq!(parsed.tasks.len(), 3);
    assert_eq!(parsed.tasks["a"].state, TaskState::Completed);
    assert_eq!(parsed.tasks["b"].state, TaskState::Running);
    assert_eq!(parsed.tasks["b"].epoch, checkpoint.tasks["b"].epoch);
    assert_eq!(parsed.tasks["c"].state, TaskState::Pending);
}
