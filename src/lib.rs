// src/lib.rs

pub mod bus;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::bus::TracingEventSink;
use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::TaskGraph;
use crate::engine::{RunReport, Runtime, Scheduler, SchedulerEvent};
use crate::exec::{LocalWorkerPool, ShellWorker};
use crate::registry::CapabilityRegistry;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading + validation
/// - the task graph and capability registry
/// - the scheduler core and its async runtime shell
/// - the local worker pool
/// - checkpoint storage (fresh run or `--resume`)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<Option<RunReport>> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(None);
    }

    let graph = TaskGraph::build(cfg.task_specs())?;
    let registry = build_registry(&cfg);
    let policy = cfg.coordinator.scheduler_policy();
    let options = cfg.coordinator.runtime_options();

    // Worker signal channel: the pool reports starts/results, Ctrl-C
    // injects a cancellation.
    let (event_tx, event_rx) = mpsc::channel::<SchedulerEvent>(64);

    let mut pool = LocalWorkerPool::new(event_tx.clone());
    for (id, worker) in cfg.worker.iter() {
        pool.add_worker(Arc::new(ShellWorker::new(
            id.clone(),
            worker.capabilities.clone(),
        )));
    }
    if cfg.worker.is_empty() {
        pool.add_worker(Arc::new(ShellWorker::new(
            "local-0",
            vec!["shell".to_string()],
        )));
    }

    // Ctrl-C → cooperative run cancellation.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(SchedulerEvent::CancelRun).await;
        });
    }

    let checkpoints = FileCheckpointStore::new(&cfg.coordinator.checkpoint_dir);
    let sink = Arc::new(TracingEventSink);

    let report = if args.resume {
        let run_id = args
            .run_id
            .as_deref()
            .ok_or_else(|| anyhow!("--resume requires --run-id to identify the checkpoint"))?;
        let checkpoint = checkpoints
            .load(run_id)?
            .ok_or_else(|| anyhow!("no checkpoint found for run id '{run_id}'"))?;
        info!(run_id = %run_id, "resuming run from checkpoint");

        let (scheduler, recovery) =
            Scheduler::restore(graph, registry, policy, &checkpoint, Instant::now());
        let runtime =
            Runtime::resumed(scheduler, recovery, event_rx, pool, checkpoints, sink, options);
        runtime.run().await?
    } else {
        let run_id = args.run_id.clone().unwrap_or_else(generate_run_id);
        info!(run_id = %run_id, "starting fresh run");

        let scheduler = Scheduler::new(run_id, graph, registry, policy);
        let runtime = Runtime::new(scheduler, event_rx, pool, checkpoints, sink, options);
        runtime.run().await?
    };

    Ok(Some(report))
}

/// Register every configured worker with its advertised capabilities. When no
/// `[worker.*]` section is present, a single local shell worker is assumed so
/// minimal configs stay runnable.
fn build_registry(cfg: &ConfigFile) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for (id, worker) in cfg.worker.iter() {
        registry.register(id.clone(), worker.capabilities.iter().cloned());
    }
    if cfg.worker.is_empty() {
        registry.register("local-0", ["shell".to_string()]);
    }
    registry
}

/// Timestamp-derived run id, e.g. `run-20260826-142501`.
fn generate_run_id() -> String {
    chrono::Utc::now().format("run-%Y%m%d-%H%M%S").to_string()
}

/// Simple dry-run output: print coordinator knobs, workers and the task DAG.
fn print_dry_run(cfg: &ConfigFile) {
    println!("flowdag dry-run");
    println!("  coordinator.max_parallel = {}", cfg.coordinator.max_parallel);
    println!(
        "  coordinator.default_max_attempts = {}",
        cfg.coordinator.default_max_attempts
    );
    println!(
        "  coordinator.checkpoint_dir = {}",
        cfg.coordinator.checkpoint_dir
    );
    println!();

    println!("workers ({}):", cfg.worker.len());
    for (id, worker) in cfg.worker.iter() {
        println!("  - {id}: {:?}", worker.capabilities);
    }
    println!();

    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        println!("  - {name}");
        println!("      type: {}", task.task_type);
        if let Some(ref cmd) = task.cmd {
            println!("      cmd: {cmd}");
        }
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if task.priority != 0 {
            println!("      priority: {}", task.priority);
        }
        if let Some(attempts) = task.max_attempts {
            println!("      max_attempts: {attempts}");
        }
        if let Some(secs) = task.timeout_secs {
            println!("      timeout_secs: {secs}");
        }
    }
}
