use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use flowdag::engine::{Assignment, SchedulerEvent, TaskName, WorkerOutcome};
use flowdag::errors::Result;
use flowdag::exec::WorkerBackend;

/// A fake worker backend that:
/// - records the order in which tasks were dispatched
/// - immediately reports `WorkerStarted` + `WorkerResult` for each
///   assignment, tagged with the assignment's epoch
/// - returns scripted outcomes per task (one per attempt, in order),
///   defaulting to success once the script runs dry.
pub struct FakeWorkerBackend {
    event_tx: mpsc::Sender<SchedulerEvent>,
    dispatched: Arc<Mutex<Vec<TaskName>>>,
    cancelled: Arc<Mutex<Vec<(TaskName, u32)>>>,
    scripts: Arc<Mutex<HashMap<TaskName, VecDeque<WorkerOutcome>>>>,
}

impl FakeWorkerBackend {
    pub fn new(event_tx: mpsc::Sender<SchedulerEvent>) -> Self {
        Self {
            event_tx,
            dispatched: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            scripts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue outcomes for a task, consumed one per attempt.
    pub fn script(&self, task: &str, outcomes: impl IntoIterator<Item = WorkerOutcome>) {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .entry(task.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Convenience: the task's next `n` attempts fail with `error`.
    pub fn script_failures(&self, task: &str, n: usize, error: &str) {
        self.script(
            task,
            std::iter::repeat_with(|| WorkerOutcome::Failure(error.to_string())).take(n),
        );
    }

    /// Handle to the dispatch log (task names in dispatch order).
    pub fn dispatched(&self) -> Arc<Mutex<Vec<TaskName>>> {
        Arc::clone(&self.dispatched)
    }

    /// Handle to the cancellation log.
    pub fn cancelled(&self) -> Arc<Mutex<Vec<(TaskName, u32)>>> {
        Arc::clone(&self.cancelled)
    }

    fn next_outcome(&self, task: &str) -> WorkerOutcome {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .get_mut(task)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| WorkerOutcome::Success(serde_json::json!({ "ok": true })))
    }
}

impl WorkerBackend for FakeWorkerBackend {
    fn dispatch(
        &mut self,
        assignments: Vec<Assignment>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.event_tx.clone();
        let dispatched = Arc::clone(&self.dispatched);
        let outcomes: Vec<(TaskName, u32, WorkerOutcome)> = assignments
            .iter()
            .map(|a| (a.task.clone(), a.epoch, self.next_outcome(&a.task)))
            .collect();

        Box::pin(async move {
            for (task, epoch, outcome) in outcomes {
                {
                    let mut guard = dispatched.lock().unwrap();
                    guard.push(task.clone());
                }

                tx.send(SchedulerEvent::WorkerStarted {
                    task: task.clone(),
                    epoch,
                })
                .await
                .map_err(anyhow::Error::from)?;

                tx.send(SchedulerEvent::WorkerResult {
                    task,
                    epoch,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel(&mut self, task: &TaskName, epoch: u32) {
        let mut guard = self.cancelled.lock().unwrap();
        guard.push((task.clone(), epoch));
    }
}
