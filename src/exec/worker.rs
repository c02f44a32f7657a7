// src/exec/worker.rs

//! The worker capability contract and the production shell worker.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::{Assignment, WorkerOutcome};

/// An executor matched to tasks by capability type.
///
/// Workers are opaque to the coordinator: it only asks what they are capable
/// of and hands them assignments. Deadlines are enforced by the scheduler's
/// poll tick; the assignment's timeout is advisory for the worker.
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this worker can execute tasks of the given type. Used to
    /// populate the capability registry.
    fn capable_of(&self, task_type: &str) -> bool;

    /// Execute one attempt and report its outcome.
    fn execute(
        &self,
        assignment: Assignment,
    ) -> Pin<Box<dyn Future<Output = WorkerOutcome> + Send + '_>>;
}

/// Production worker that executes command payloads via the platform shell.
///
/// The payload is expected to carry a `cmd` string; the command's exit
/// status decides the outcome and its stdout is returned as the result
/// payload.
pub struct ShellWorker {
    id: String,
    capabilities: Vec<String>,
}

impl ShellWorker {
    pub fn new(id: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            id: id.into(),
            capabilities,
        }
    }
}

impl Worker for ShellWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn capable_of(&self, task_type: &str) -> bool {
        self.capabilities.iter().any(|c| c == task_type)
    }

    fn execute(
        &self,
        assignment: Assignment,
    ) -> Pin<Box<dyn Future<Output = WorkerOutcome> + Send + '_>> {
        Box::pin(async move {
            match run_command(&assignment).await {
                Ok(outcome) => outcome,
                Err(e) => WorkerOutcome::Failure(format!("{e:#}")),
            }
        })
    }
}

async fn run_command(assignment: &Assignment) -> anyhow::Result<WorkerOutcome> {
    let Some(cmd_str) = assignment.payload.get("cmd").and_then(|v| v.as_str()) else {
        anyhow::bail!(
            "task '{}' payload has no 'cmd' string for the shell worker",
            assignment.task
        );
    };

    info!(
        task = %assignment.task,
        worker = %assignment.worker,
        epoch = assignment.epoch,
        cmd = %cmd_str,
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_str);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_str);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", assignment.task))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = stderr {
        let task = assignment.task.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task, "stderr: {}", line);
            }
        });
    }

    let mut collected = String::new();
    if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %assignment.task, "stdout: {}", line);
            collected.push_str(&line);
            collected.push('\n');
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", assignment.task))?;

    let code = status.code().unwrap_or(-1);
    info!(
        task = %assignment.task,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if status.success() {
        Ok(WorkerOutcome::Success(serde_json::json!({
            "exit_code": code,
            "stdout": collected,
        })))
    } else {
        Ok(WorkerOutcome::Failure(format!(
            "process exited with code {code}"
        )))
    }
}
