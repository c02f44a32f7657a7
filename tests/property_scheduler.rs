// tests/property_scheduler.rs
//
// Property tests driving the pure scheduler core over randomly generated
// DAGs: the run always terminates, dependency order is never violated, and
// the final report partitions the task set.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use proptest::prelude::*;

use flowdag::dag::{TaskGraph, TaskSpec};
use flowdag::engine::retry::RetryPolicy;
use flowdag::engine::{
    Assignment, Command, Scheduler, SchedulerEvent, SchedulerPolicy, WorkerOutcome,
};
use flowdag::registry::CapabilityRegistry;
use flowdag::state::RunStatus;

// Acyclicity by construction: task N may only depend on tasks 0..N.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<TaskSpec>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw_deps| {
            raw_deps
                .into_iter()
                .enumerate()
                .map(|(i, potential_deps)| {
                    let mut spec = TaskSpec::new(format!("task_{i}"), "shell");
                    let mut seen = HashSet::new();
                    for dep_idx in potential_deps {
                        if i > 0 && seen.insert(dep_idx % i) {
                            spec.after.push(format!("task_{}", dep_idx % i));
                        }
                    }
                    spec
                })
                .collect()
        })
    })
}

fn policy() -> SchedulerPolicy {
    SchedulerPolicy {
        max_parallel: 3,
        retry: RetryPolicy {
            base: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
            max_delay: Duration::from_secs(1),
        },
        unmatched_pass_limit: 10,
    }
}

fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register("w1", ["shell".to_string()]);
    registry.register("w2", ["shell".to_string()]);
    registry
}

fn collect_assignments(commands: &[Command], inbox: &mut Vec<Assignment>) {
    for command in commands {
        if let Command::Dispatch(assignments) = command {
            inbox.extend(assignments.iter().cloned());
        }
    }
}

proptest! {
    #[test]
    fn every_run_terminates_and_respects_dependencies(
        specs in dag_strategy(10),
        failing_indices in proptest::collection::vec(0..10usize, 0..4),
    ) {
        let failing: HashSet<String> = failing_indices
            .iter()
            .map(|i| format!("task_{i}"))
            .collect();

        let deps: HashMap<String, Vec<String>> = specs
            .iter()
            .map(|s| (s.name.clone(), s.after.clone()))
            .collect();
        let total = specs.len();

        let graph = TaskGraph::build(specs).expect("constructed DAG is valid");
        let mut scheduler = Scheduler::new("prop-run", graph, registry(), policy());

        let mut now = Instant::now();
        let mut inbox: Vec<Assignment> = Vec::new();
        let mut completed_order: Vec<String> = Vec::new();

        let step = scheduler.start(now);
        let mut finished = step.run_finished;
        collect_assignments(&step.commands, &mut inbox);

        // Simulation loop: answer every assignment, tick time forward so
        // retry backoffs elapse.
        let mut steps = 0;
        while finished.is_none() {
            steps += 1;
            prop_assert!(steps < 1000, "scheduler did not settle");

            let step = if let Some(assignment) = inbox.pop() {
                let outcome = if failing.contains(&assignment.task) {
                    WorkerOutcome::Failure("scripted".to_string())
                } else {
                    completed_order.push(assignment.task.clone());
                    WorkerOutcome::Success(serde_json::Value::Null)
                };
                scheduler.handle_event(
                    SchedulerEvent::WorkerResult {
                        task: assignment.task,
                        epoch: assignment.epoch,
                        outcome,
                    },
                    now,
                )
            } else {
                now += Duration::from_millis(50);
                scheduler.handle_tick(now)
            };

            collect_assignments(&step.commands, &mut inbox);
            finished = step.run_finished;
        }

        // Causal ordering: a task only ever completes after all of its
        // dependencies.
        let position: HashMap<&String, usize> = completed_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();
        for name in &completed_order {
            for dep in &deps[name] {
                prop_assert!(
                    position.contains_key(dep),
                    "{name} completed but its dependency {dep} did not"
                );
                prop_assert!(position[dep] < position[name]);
            }
        }

        // The report partitions the task set.
        let report = scheduler.report();
        prop_assert_eq!(
            report.completed.len() + report.failed.len() + report.blocked.len(),
            total
        );

        // Status is consistent with the outcome sets.
        match report.status {
            RunStatus::Succeeded => {
                prop_assert!(report.failed.is_empty() && report.blocked.is_empty());
            }
            RunStatus::PartiallyFailed | RunStatus::Failed => {
                prop_assert!(!report.failed.is_empty() || !report.blocked.is_empty());
            }
            status => prop_assert!(false, "unexpected terminal status {status}"),
        }
    }
}
