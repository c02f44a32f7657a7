// src/config/validate.rs

use anyhow::{anyhow, Context, Result};

use crate::config::model::ConfigFile;
use crate::dag::TaskGraph;

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one task
/// - coordinator knobs are sane (`max_parallel >= 1`, jitter in `[0, 1]`, ...)
/// - worker capability references resolve (every task type is served by at
///   least one configured worker, unless no workers are configured at all)
/// - the task graph is well formed: no duplicate names, no unknown or self
///   `after` references, no cycles
///
/// Graph structure checks are delegated to [`TaskGraph::build`] so the CLI and
/// the engine reject exactly the same inputs.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_coordinator(cfg)?;
    validate_graph(cfg)?;
    warn_uncovered_task_types(cfg);
    Ok(())
}

fn ensure_has_tasks(cfg: &ConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(anyhow!(
            "config must contain at least one [task.<name>] section"
        ));
    }
    Ok(())
}

fn validate_coordinator(cfg: &ConfigFile) -> Result<()> {
    let c = &cfg.coordinator;

    if c.max_parallel == 0 {
        return Err(anyhow!("[coordinator].max_parallel must be >= 1 (got 0)"));
    }
    if c.default_max_attempts == 0 {
        return Err(anyhow!(
            "[coordinator].default_max_attempts must be >= 1 (got 0)"
        ));
    }
    if !(0.0..=1.0).contains(&c.backoff_jitter) {
        return Err(anyhow!(
            "[coordinator].backoff_jitter must be within [0.0, 1.0] (got {})",
            c.backoff_jitter
        ));
    }
    if c.backoff_multiplier < 1.0 {
        return Err(anyhow!(
            "[coordinator].backoff_multiplier must be >= 1.0 (got {})",
            c.backoff_multiplier
        ));
    }
    if c.backoff_base_ms == 0 {
        return Err(anyhow!("[coordinator].backoff_base_ms must be >= 1 (got 0)"));
    }

    Ok(())
}

fn validate_graph(cfg: &ConfigFile) -> Result<()> {
    let specs = cfg.task_specs();
    TaskGraph::build(specs).context("invalid task graph in config")?;
    Ok(())
}

/// A task type with no capable worker is not a hard error: the run starts and
/// the scheduler reports the mismatch at runtime. Surface it early anyway.
fn warn_uncovered_task_types(cfg: &ConfigFile) {
    if cfg.worker.is_empty() {
        return;
    }
    for (name, task) in cfg.task.iter() {
        let task_type = &task.task_type;
        let covered = cfg
            .worker
            .values()
            .any(|w| w.capabilities.iter().any(|c| c == task_type));
        if !covered {
            tracing::warn!(
                task = %name,
                task_type = %task_type,
                "no configured worker advertises this task type"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> ConfigFile {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn accepts_minimal_config() {
        let cfg = parse(
            r#"
            [task.build]
            cmd = "make"
            "#,
        );
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn rejects_empty_task_table() {
        let cfg = parse("");
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn rejects_zero_max_parallel() {
        let cfg = parse(
            r#"
            [coordinator]
            max_parallel = 0

            [task.build]
            cmd = "make"
            "#,
        );
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let cfg = parse(
            r#"
            [coordinator]
            backoff_jitter = 1.5

            [task.build]
            cmd = "make"
            "#,
        );
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("backoff_jitter"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let cfg = parse(
            r#"
            [task.deploy]
            cmd = "deploy.sh"
            after = ["build"]
            "#,
        );
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn rejects_cycle() {
        let cfg = parse(
            r#"
            [task.a]
            cmd = "a"
            after = ["b"]

            [task.b]
            cmd = "b"
            after = ["a"]
            "#,
        );
        assert!(validate_config(&cfg).is_err());
    }
}
