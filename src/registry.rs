// src/registry.rs

//! Capability registry: which workers can execute which task types.
//!
//! Matching is a pure data lookup — workers declare capability tags at
//! registration and the scheduler asks for the least-loaded candidate. No
//! runtime type inspection anywhere.

use std::collections::HashSet;

use tracing::debug;

use crate::engine::WorkerId;

#[derive(Debug, Clone)]
struct WorkerEntry {
    id: WorkerId,
    capabilities: HashSet<String>,
    /// Tasks currently dispatched to this worker.
    active: usize,
}

/// Registry of workers keyed by capability.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    /// Registration order is preserved; it breaks load ties.
    workers: Vec<WorkerEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker with its capability tags.
    pub fn register(&mut self, id: impl Into<WorkerId>, capabilities: impl IntoIterator<Item = String>) {
        let id = id.into();
        let capabilities: HashSet<String> = capabilities.into_iter().collect();
        debug!(worker = %id, ?capabilities, "worker registered");
        self.workers.push(WorkerEntry {
            id,
            capabilities,
            active: 0,
        });
    }

    /// Whether any registered worker can execute the given task type.
    pub fn has_capability(&self, task_type: &str) -> bool {
        self.workers
            .iter()
            .any(|w| w.capabilities.contains(task_type))
    }

    /// Least-loaded worker capable of the given task type; ties broken by
    /// registration order. `None` means no capable worker exists right now —
    /// the scheduler keeps the task `Ready` rather than dropping it.
    pub fn match_worker(&self, task_type: &str) -> Option<&WorkerId> {
        self.workers
            .iter()
            .filter(|w| w.capabilities.contains(task_type))
            .min_by_key(|w| w.active)
            .map(|w| &w.id)
    }

    /// Account for a dispatch to the given worker.
    pub fn note_dispatched(&mut self, id: &str) {
        if let Some(entry) = self.workers.iter_mut().find(|w| w.id == id) {
            entry.active += 1;
        }
    }

    /// Account for a dispatch leaving the given worker (completion, failure,
    /// timeout, or cancellation).
    pub fn note_released(&mut self, id: &str) {
        if let Some(entry) = self.workers.iter_mut().find(|w| w.id == id) {
            entry.active = entry.active.saturating_sub(1);
        }
    }

    /// Drop all load accounting. Used on checkpoint restore, where no
    /// dispatch survives the restart.
    pub fn reset_load(&mut self) {
        for entry in &mut self.workers {
            entry.active = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        let mut r = CapabilityRegistry::new();
        r.register("w1", ["shell".to_string()]);
        r.register("w2", ["shell".to_string(), "lint".to_string()]);
        r
    }

    #[test]
    fn registration_order_breaks_ties() {
        let r = registry();
        assert_eq!(r.match_worker("shell"), Some(&"w1".to_string()));
    }

    #[test]
    fn least_loaded_wins() {
        let mut r = registry();
        r.note_dispatched("w1");
        assert_eq!(r.match_worker("shell"), Some(&"w2".to_string()));
        r.note_released("w1");
        assert_eq!(r.match_worker("shell"), Some(&"w1".to_string()));
    }

    #[test]
    fn unknown_capability_matches_nothing() {
        let r = registry();
        assert_eq!(r.match_worker("deploy"), None);
        assert!(!r.has_capability("deploy"));
    }
}
