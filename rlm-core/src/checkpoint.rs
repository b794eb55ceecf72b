//! Durable checkpoint manager.
//!
//! Persists the in-flight task state, RLM loop state, and aggregate service
//! statistics to a single JSON file, written atomically (temp file + rename)
//! so a crash mid-write never leaves a torn checkpoint on disk. Updates to
//! the substates take the write lock; `save` takes only a read lock, so
//! concurrent substate updates don't block each other's readers during a
//! save.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

fn io_error(context: &str, e: std::io::Error) -> Error {
    Error::Internal(format!("{context}: {e}"))
}

const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_FILE: &str = "session_checkpoint.json";

/// In-flight task progress, cleared on graceful stop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: Option<String>,
    pub query: Option<String>,
    pub node_count: u64,
    pub fact_count: u64,
    pub entity_count: u64,
    pub partial_result: Option<String>,
}

/// In-flight RLM execution-loop progress, cleared on graceful stop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RlmState {
    pub iteration: u32,
    pub max_iterations: u32,
    pub conversation: Vec<String>,
    pub variables: Vec<String>,
}

/// Aggregate statistics that persist across sessions, unaffected by
/// graceful stop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub recovered: u64,
    pub degraded: u64,
}

/// On-disk checkpoint envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub task_state: TaskState,
    pub rlm_state: RlmState,
    pub stats: ServiceStats,
}

impl Checkpoint {
    fn fresh(session_id: String) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            session_id,
            saved_at: Utc::now(),
            task_state: TaskState::default(),
            rlm_state: RlmState::default(),
            stats: ServiceStats::default(),
        }
    }
}

/// Human-readable rollup of a checkpoint's substates. Total on any
/// combination of present/absent task or RLM state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
    pub has_task: bool,
    pub has_rlm_progress: bool,
    pub node_count: u64,
    pub iteration: u32,
    pub tasks_completed: u64,
}

/// Manages loading, saving, and periodically snapshotting a single
/// checkpoint file.
pub struct CheckpointManager {
    path: PathBuf,
    max_age: Duration,
    state: RwLock<Checkpoint>,
}

impl CheckpointManager {
    /// Construct a manager rooted at `dir`, starting from a fresh
    /// checkpoint. Call [`load`](Self::load) to recover a prior session.
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: dir.into().join(CHECKPOINT_FILE),
            max_age,
            state: RwLock::new(Checkpoint::fresh(Uuid::new_v4().to_string())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint file if present and not stale. A checkpoint
    /// older than `max_age` is rejected and deleted rather than resumed
    /// from, since its task/RLM progress is presumed no longer relevant.
    pub fn load(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| io_error("reading checkpoint", e))?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;

        let age = Utc::now().signed_duration_since(checkpoint.saved_at);
        let age = age.to_std().unwrap_or(Duration::ZERO);
        if age >= self.max_age {
            let _ = fs::remove_file(&self.path);
            return Ok(false);
        }

        *self.state.write().unwrap() = checkpoint;
        Ok(true)
    }

    /// Persist the current state atomically: write to `<path>.tmp`, then
    /// rename over the real path. The rename is a single filesystem
    /// operation, so a reader never observes a partially-written file.
    pub fn save(&self) -> Result<()> {
        let mut snapshot = self.state.read().unwrap().clone();
        snapshot.saved_at = Utc::now();

        let serialized = serde_json::to_string_pretty(&snapshot)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized).map_err(|e| io_error("writing checkpoint", e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| io_error("renaming checkpoint", e))?;
        Ok(())
    }

    /// Spawn a background task that calls [`save`](Self::save) once every
    /// `interval`, logging and continuing on failure rather than aborting
    /// the loop. Drop or abort the returned handle to stop it.
    pub fn spawn_periodic_save(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.save() {
                    tracing::warn!("periodic checkpoint save failed: {e}");
                }
            }
        })
    }

    /// Mutate the task substate under the write lock.
    pub fn update_task<F: FnOnce(&mut TaskState)>(&self, f: F) {
        f(&mut self.state.write().unwrap().task_state);
    }

    /// Mutate the RLM-loop substate under the write lock.
    pub fn update_rlm<F: FnOnce(&mut RlmState)>(&self, f: F) {
        f(&mut self.state.write().unwrap().rlm_state);
    }

    /// Mutate the aggregate stats substate under the write lock.
    pub fn update_stats<F: FnOnce(&mut ServiceStats)>(&self, f: F) {
        f(&mut self.state.write().unwrap().stats);
    }

    pub fn session_id(&self) -> String {
        self.state.read().unwrap().session_id.clone()
    }

    pub fn task_state(&self) -> TaskState {
        self.state.read().unwrap().task_state.clone()
    }

    pub fn rlm_state(&self) -> RlmState {
        self.state.read().unwrap().rlm_state.clone()
    }

    pub fn stats(&self) -> ServiceStats {
        self.state.read().unwrap().stats.clone()
    }

    /// Clear in-flight task and RLM progress on a graceful stop, preserving
    /// the session id and aggregate stats across the next session.
    pub fn graceful_stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            state.task_state = TaskState::default();
            state.rlm_state = RlmState::default();
        }
        self.save()
    }

    /// Roll up the current checkpoint into a display-friendly summary.
    /// Total on any combination of absent/default substates.
    pub fn summary(&self) -> Summary {
        let state = self.state.read().unwrap();
        Summary {
            session_id: state.session_id.clone(),
            saved_at: state.saved_at,
            has_task: state.task_state.task_id.is_some(),
            has_rlm_progress: state.rlm_state.iteration > 0,
            node_count: state.task_state.node_count,
            iteration: state.rlm_state.iteration,
            tasks_completed: state.stats.tasks_completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load_preserves_task_and_stats() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        mgr.update_task(|t| {
            t.task_id = Some("abc".into());
            t.node_count = 50;
        });
        mgr.update_stats(|s| s.tasks_completed = 3);
        mgr.save().unwrap();

        let session_id = mgr.session_id();

        let reloaded = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.session_id(), session_id);
        assert_eq!(reloaded.task_state().node_count, 50);
        assert_eq!(reloaded.stats().tasks_completed, 3);
    }

    #[test]
    fn test_load_returns_false_when_no_file() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        assert!(!mgr.load().unwrap());
    }

    #[test]
    fn test_stale_checkpoint_rejected_and_deleted() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        mgr.update_task(|t| t.task_id = Some("old".into()));
        mgr.save().unwrap();

        // Rewrite the file on disk directly with a stale timestamp — going
        // through `save()` again would re-stamp `saved_at` to now.
        let mut stale = mgr.state.read().unwrap().clone();
        stale.saved_at = Utc::now() - chrono::Duration::hours(2);
        fs::write(mgr.path(), serde_json::to_string_pretty(&stale).unwrap()).unwrap();

        let reloaded = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        assert!(!reloaded.load().unwrap());
        assert!(!mgr.path().exists());
    }

    #[test]
    fn test_graceful_stop_clears_task_and_rlm_but_keeps_stats() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        mgr.update_task(|t| t.task_id = Some("abc".into()));
        mgr.update_rlm(|r| r.iteration = 5);
        mgr.update_stats(|s| s.tasks_completed = 7);

        mgr.graceful_stop().unwrap();

        assert!(mgr.task_state().task_id.is_none());
        assert_eq!(mgr.rlm_state().iteration, 0);
        assert_eq!(mgr.stats().tasks_completed, 7);
    }

    #[test]
    fn test_summary_total_on_default_state() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        let summary = mgr.summary();
        assert!(!summary.has_task);
        assert!(!summary.has_rlm_progress);
    }

    #[test]
    fn test_summary_total_on_populated_state() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        mgr.update_task(|t| t.task_id = Some("x".into()));
        mgr.update_rlm(|r| r.iteration = 2);
        let summary = mgr.summary();
        assert!(summary.has_task);
        assert!(summary.has_rlm_progress);
    }

    #[tokio::test]
    async fn test_spawn_periodic_save_writes_file_on_tick() {
        let dir = tempdir().unwrap();
        let mgr = Arc::new(CheckpointManager::new(dir.path(), Duration::from_secs(3600)));
        mgr.update_task(|t| t.task_id = Some("periodic".into()));

        let handle = mgr.clone().spawn_periodic_save(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        let reloaded = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.task_state().task_id.as_deref(), Some("periodic"));
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), Duration::from_secs(3600));
        mgr.save().unwrap();
        assert!(!mgr.path().with_extension("json.tmp").exists());
        assert!(mgr.path().exists());
    }
}
