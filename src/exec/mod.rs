// src/exec/mod.rs

//! Worker execution layer.
//!
//! This module is responsible for actually executing assignments handed out
//! by the scheduler, and reporting back via `SchedulerEvent`s.
//!
//! - [`backend`] provides the `WorkerBackend` trait the runtime dispatches
//!   through, which tests replace with a fake implementation.
//! - [`worker`] defines the `Worker` capability contract and the
//!   production `ShellWorker` that executes command payloads.
//! - [`pool`] owns the `LocalWorkerPool` backend that runs `Worker`
//!   implementations as concurrent Tokio tasks with cancellation support.

pub mod backend;
pub mod pool;
pub mod worker;

pub use backend::WorkerBackend;
pub use pool::LocalWorkerPool;
pub use worker::{ShellWorker, Worker};
