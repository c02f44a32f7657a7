// src/state/mod.rs

//! Authoritative task lifecycle state.
//!
//! - [`record`] defines the closed [`TaskState`] enum, its transition
//!   legality table, and the per-task [`TaskRecord`] bookkeeping.
//! - [`store`] is the single-writer [`StateStore`]: every state mutation in
//!   the crate goes through its transition API, which is what keeps
//!   checkpointing and recovery consistent.

pub mod record;
pub mod store;

pub use record::{DispatchRecord, RunStatus, TaskRecord, TaskState};
pub use store::{StateCounts, StateStore, Transition};
