// src/checkpoint/store.rs

//! Checkpoint persistence backends.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::errors::Result;

/// Where checkpoints go. `save` must be atomic: no partial checkpoint is
/// ever observable by a later `load`.
pub trait CheckpointStore: Send {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn load(&self, run_id: &str) -> Result<Option<Checkpoint>>;
}

/// File-backed store: one JSON file per run under a dot-directory,
/// written to a temp file and renamed into place so a crash mid-write
/// leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint dir {:?}", self.dir))?;

        let path = self.path_for(&checkpoint.run_id);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(checkpoint)
            .context("serializing checkpoint")
            .map_err(crate::errors::FlowdagError::Other)?;

        fs::write(&tmp, body).with_context(|| format!("writing checkpoint to {tmp:?}"))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("publishing checkpoint at {path:?}"))?;

        debug!(run_id = %checkpoint.run_id, path = ?path, "checkpoint saved");
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(run_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(crate::errors::FlowdagError::Other(
                    anyhow::Error::new(e).context(format!("reading checkpoint at {path:?}")),
                ));
            }
        };

        let checkpoint: Checkpoint = serde_json::from_str(&contents)
            .with_context(|| format!("parsing checkpoint at {path:?}"))
            .map_err(crate::errors::FlowdagError::Other)?;

        Ok(Some(checkpoint))
    }
}

/// In-memory store for tests and embedders that persist elsewhere. Clones
/// share the same underlying map.
#[derive(Debug, Default, Clone)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<Mutex<HashMap<String, Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut guard = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let guard = self.checkpoints.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunStatus;
    use std::collections::BTreeMap;

    fn checkpoint(run_id: &str) -> Checkpoint {
        Checkpoint {
            run_id: run_id.to_string(),
            status: RunStatus::InProgress,
            taken_at: chrono::Utc::now(),
            tasks: BTreeMap::new(),
        }
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save(&checkpoint("run-1")).unwrap();
        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.status, RunStatus::InProgress);
    }

    #[test]
    fn missing_run_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn newer_save_supersedes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save(&checkpoint("run-1")).unwrap();
        let mut second = checkpoint("run-1");
        second.status = RunStatus::Succeeded;
        store.save(&second).unwrap();

        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Succeeded);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&checkpoint("run-1")).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
