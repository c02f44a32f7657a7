// src/dag/spec.rs

//! The `TaskSpec` work-item model.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::TaskName;

/// A unit of schedulable work, as declared by the caller.
///
/// The spec is static: once a graph is built from a set of specs, the
/// topology never changes. Only the per-run lifecycle state (owned by the
/// state store) mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique, stable task name.
    pub name: TaskName,

    /// Capability tag used to match this task to a worker
    /// (e.g. "shell", "frontend-generate", "schema-migrate").
    pub task_type: String,

    /// Names of tasks that must reach `Completed` before this one becomes
    /// ready. Must not contain `name` itself.
    pub after: Vec<TaskName>,

    /// Ordering hint among simultaneously-ready tasks; higher is dispatched
    /// first. Ties are broken by declaration order.
    pub priority: i32,

    /// Maximum number of execution attempts before the task is failed.
    pub max_attempts: u32,

    /// Per-attempt execution deadline.
    pub timeout: Duration,

    /// Opaque payload handed to the matched worker.
    pub payload: serde_json::Value,
}

impl TaskSpec {
    /// Minimal spec with library defaults; builders in tests and the config
    /// layer fill in the rest.
    pub fn new(name: impl Into<TaskName>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            after: Vec::new(),
            priority: 0,
            max_attempts: 3,
            timeout: Duration::from_secs(300),
            payload: serde_json::Value::Null,
        }
    }
}
