// src/checkpoint/mod.rs

//! Durable run snapshots.
//!
//! A [`Checkpoint`] is a consistent, point-in-time snapshot of every task's
//! lifecycle state, attempt count, epoch and result, plus which worker held
//! each in-flight dispatch. The scheduler requests one on a fixed interval
//! and on every terminal transition; [`store`] provides the persistence
//! backends (atomic file writes in production, in-memory for tests).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{TaskName, WorkerId};
use crate::state::{RunStatus, TaskState};

pub mod store;

pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

/// Snapshot of a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub attempts: u32,
    pub epoch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Worker holding the dispatch at snapshot time, if the task was in
    /// flight. Informational: recovery never assumes partial progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_to: Option<WorkerId>,
}

/// A consistent snapshot of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub status: RunStatus,
    pub taken_at: DateTime<Utc>,
    pub tasks: BTreeMap<TaskName, TaskSnapshot>,
}
