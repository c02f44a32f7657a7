// src/config/mod.rs

//! Workflow configuration.
//!
//! - [`model`] maps the TOML file to typed sections.
//! - [`loader`] reads and deserializes config files.
//! - [`validate`] runs semantic validation (dependency references, cycles,
//!   coordinator knob sanity) before anything is scheduled.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, CoordinatorSection, TaskConfig, WorkerConfig};
pub use validate::validate_config;
