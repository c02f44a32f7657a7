// src/dag/mod.rs

//! Task graph representation.
//!
//! - [`spec`] defines the [`TaskSpec`] work-item model.
//! - [`graph`] holds the immutable-after-build dependency graph, including
//!   build-time validation (duplicates, dangling references, self-loops,
//!   cycles) and the dependents index used for incremental readiness.

pub mod graph;
pub mod spec;

pub use graph::{GraphError, TaskGraph};
pub use spec::TaskSpec;
