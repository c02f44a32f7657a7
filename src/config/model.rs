// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::TaskSpec;
use crate::engine::{RetryPolicy, RuntimeOptions, SchedulerPolicy};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [coordinator]
/// max_parallel = 4
/// default_max_attempts = 3
///
/// [worker.shell-1]
/// capabilities = ["shell"]
///
/// [task.build]
/// type = "shell"
/// cmd = "cargo build"
/// after = ["fetch"]
/// priority = 5
/// ```
///
/// All sections are optional and have reasonable defaults, except that at
/// least one task is required.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// Scheduling knobs from `[coordinator]`.
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// Workers from `[worker.<id>]`. Keys are worker ids.
    #[serde(default)]
    pub worker: BTreeMap<String, WorkerConfig>,

    /// Tasks from `[task.<name>]`. Keys are the task names.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    /// Worker-concurrency ceiling: how many tasks may be in flight at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Default attempt budget for tasks that don't set `max_attempts`.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Default per-attempt deadline for tasks that don't set `timeout_secs`.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Base retry backoff in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter fraction in `[0, 1]`.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: f64,

    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,

    /// Fixed interval between periodic checkpoints.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    /// Directory holding checkpoint files.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Scheduling passes a ready task may sit without a capable worker
    /// before a run-level warning is published.
    #[serde(default = "default_unmatched_pass_limit")]
    pub unmatched_pass_limit: u32,
}

fn default_max_parallel() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_jitter() -> f64 {
    0.2
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_checkpoint_interval_secs() -> u64 {
    10
}

fn default_checkpoint_dir() -> String {
    ".flowdag".to_string()
}

fn default_unmatched_pass_limit() -> u32 {
    10
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            default_max_attempts: default_max_attempts(),
            default_timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_jitter: default_backoff_jitter(),
            backoff_max_secs: default_backoff_max_secs(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            checkpoint_dir: default_checkpoint_dir(),
            unmatched_pass_limit: default_unmatched_pass_limit(),
        }
    }
}

impl CoordinatorSection {
    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy {
            max_parallel: self.max_parallel,
            retry: RetryPolicy {
                base: Duration::from_millis(self.backoff_base_ms),
                multiplier: self.backoff_multiplier,
                jitter: self.backoff_jitter,
                max_delay: Duration::from_secs(self.backoff_max_secs),
            },
            unmatched_pass_limit: self.unmatched_pass_limit,
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            checkpoint_interval: Duration::from_secs(self.checkpoint_interval_secs),
            ..RuntimeOptions::default()
        }
    }
}

/// `[worker.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Task types this worker can execute.
    pub capabilities: Vec<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Capability tag used for worker matching.
    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: String,

    /// Shorthand for a shell-command payload: `cmd = "..."` becomes
    /// `payload = { cmd = "..." }`.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Opaque payload handed to the worker. Overrides `cmd` if both are set.
    #[serde(default)]
    pub payload: Option<serde_json::Value>,

    /// Names of tasks that must complete before this one.
    #[serde(default)]
    pub after: Vec<String>,

    /// Higher priority dispatches first among simultaneously-ready tasks.
    #[serde(default)]
    pub priority: i32,

    /// Per-task attempt budget; defaults to the coordinator-wide value.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Per-attempt deadline; defaults to the coordinator-wide value.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_task_type() -> String {
    "shell".to_string()
}

impl ConfigFile {
    /// Materialise task specs, applying coordinator-wide defaults.
    ///
    /// `BTreeMap` iteration gives a stable declaration order, which is what
    /// breaks priority ties deterministically.
    pub fn task_specs(&self) -> Vec<TaskSpec> {
        self.task
            .iter()
            .map(|(name, tc)| {
                let payload = tc.payload.clone().unwrap_or_else(|| match &tc.cmd {
                    Some(cmd) => serde_json::json!({ "cmd": cmd }),
                    None => serde_json::Value::Null,
                });

                TaskSpec {
                    name: name.clone(),
                    task_type: tc.task_type.clone(),
                    after: tc.after.clone(),
                    priority: tc.priority,
                    max_attempts: tc
                        .max_attempts
                        .unwrap_or(self.coordinator.default_max_attempts),
                    timeout: Duration::from_secs(
                        tc.timeout_secs.unwrap_or(self.coordinator.default_timeout_secs),
                    ),
                    payload,
                }
            })
            .collect()
    }
}
