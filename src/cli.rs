// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run a workflow of dependent tasks with capability-matched workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow config file (TOML).
    ///
    /// Default: `Flowdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: String,

    /// Identifier for this run.
    ///
    /// If omitted, a timestamp-derived id is generated. Checkpoints are
    /// stored under this id, so pass the same value with `--resume` to
    /// continue an interrupted run.
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Resume from the latest checkpoint of the given run id instead of
    /// starting fresh.
    #[arg(long)]
    pub resume: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG, but don't execute any tasks.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
