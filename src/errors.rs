// src/errors.rs

//! Crate-wide error types and helpers.

use thiserror::Error;

use crate::dag::GraphError;
use crate::state::TaskState;

#[derive(Error, Debug)]
pub enum FlowdagError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("illegal state transition for task '{task}': {from:?} -> {to:?}")]
    IllegalTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FlowdagError>;
