#![allow(dead_code)]

use std::time::Duration;

use flowdag::dag::{TaskGraph, TaskSpec};
use flowdag::registry::CapabilityRegistry;

/// Builder for `TaskSpec` to simplify test setup.
///
/// Defaults match the production spec defaults: type `shell`, 3 attempts,
/// 300-second timeout, priority 0, null payload.
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: TaskSpec::new(name, "shell"),
        }
    }

    pub fn task_type(mut self, task_type: &str) -> Self {
        self.spec.task_type = task_type.to_string();
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.spec.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.spec.max_attempts = attempts;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = timeout;
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.spec.payload = payload;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

/// Shorthand for a shell task with dependencies.
pub fn task(name: &str, after: &[&str]) -> TaskSpec {
    let mut builder = TaskSpecBuilder::new(name);
    for dep in after {
        builder = builder.after(dep);
    }
    builder.build()
}

/// Build a validated graph from specs, panicking on invalid input.
pub fn graph_of(specs: Vec<TaskSpec>) -> TaskGraph {
    TaskGraph::build(specs).expect("test graph should be valid")
}

/// Registry with a single worker capable of the given task types.
pub fn single_worker_registry(id: &str, capabilities: &[&str]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(id, capabilities.iter().map(|s| s.to_string()));
    registry
}
