//! Checkpoint stores shipped with the core.
//!
//! [`MemoryCheckpointer`] keeps checkpoints for the life of the process.
//! [`FileCheckpointer`] writes one JSON file per checkpoint so a paused task
//! can be resumed by a later process. Both keep the full history of a task
//! until it is deleted or expires.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::adapter::{Checkpoint, CheckpointerAdapter};
use crate::config::CheckpointSettings;
use crate::error::AdapterError;
use crate::task::TaskId;

/// Build the checkpointer selected by `settings`.
pub fn from_settings(settings: &CheckpointSettings) -> Arc<dyn CheckpointerAdapter> {
    match &settings.dir {
        Some(dir) => Arc::new(FileCheckpointer::new(dir)),
        None => Arc::new(MemoryCheckpointer::new()),
    }
}

fn check_owner(task_id: &TaskId, checkpoint: &Checkpoint) -> Result<(), AdapterError> {
    if &checkpoint.task_id != task_id {
        return Err(AdapterError::Checkpoint(format!(
            "checkpoint belongs to task {}, not {task_id}",
            checkpoint.task_id
        )));
    }
    Ok(())
}

/// Checkpoints created before this instant are expired.
fn expiry_cutoff(max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    /// Oldest first.
    checkpoints: RwLock<HashMap<TaskId, Vec<Checkpoint>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks with at least one checkpoint.
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointerAdapter for MemoryCheckpointer {
    async fn save(&self, task_id: &TaskId, checkpoint: Checkpoint) -> Result<(), AdapterError> {
        check_owner(task_id, &checkpoint)?;
        // The write lock serializes writers, including writers for one task.
        self.checkpoints
            .write()
            .await
            .entry(task_id.clone())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, AdapterError> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(task_id)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn delete(&self, task_id: &TaskId) -> Result<bool, AdapterError> {
        Ok(self.checkpoints.write().await.remove(task_id).is_some())
    }

    async fn list(
        &self,
        task_id: &TaskId,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, AdapterError> {
        let checkpoints = self.checkpoints.read().await;
        let Some(history) = checkpoints.get(task_id) else {
            return Ok(Vec::new());
        };
        Ok(history
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<usize, AdapterError> {
        let cutoff = expiry_cutoff(max_age);
        let mut checkpoints = self.checkpoints.write().await;
        let mut removed = 0;
        checkpoints.retain(|_, history| {
            let before = history.len();
            history.retain(|c| c.created_at >= cutoff);
            removed += before - history.len();
            !history.is_empty()
        });
        if removed > 0 {
            tracing::debug!(removed, "expired in-memory checkpoints");
        }
        Ok(removed)
    }

    fn supports_history(&self) -> bool {
        true
    }

    fn supports_ttl(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// On disk
// ---------------------------------------------------------------------------

/// Stores each checkpoint as `<dir>/<task_id>/<seq>.json`, where `seq`
/// increases with every save of the task.
///
/// Writes for one task are serialized by a per-task lock and land
/// atomically (temp file, then rename). The directory is created on first
/// write.
#[derive(Debug)]
pub struct FileCheckpointer {
    dir: PathBuf,
    locks: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AdapterError {
    AdapterError::Checkpoint(format!("failed to {action} {}: {e}", path.display()))
}

/// Sequence-numbered checkpoint files in `task_dir`, oldest first.
async fn history(task_dir: &Path) -> Result<Vec<(u64, PathBuf)>, AdapterError> {
    let mut entries = match tokio::fs::read_dir(task_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("read", task_dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("read", task_dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let seq = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        if let Some(seq) = seq {
            files.push((seq, path));
        }
    }
    files.sort_unstable_by_key(|(seq, _)| *seq);
    Ok(files)
}

/// Read one checkpoint file. A file removed in the meantime reads as `None`.
async fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, AdapterError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error("read", path, e)),
    };
    let checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
        AdapterError::Checkpoint(format!("corrupt checkpoint {}: {e}", path.display()))
    })?;
    Ok(Some(checkpoint))
}

/// Write `bytes` as the task's next checkpoint file. Callers hold the task lock.
async fn write_next(task_dir: &Path, bytes: &[u8]) -> Result<PathBuf, AdapterError> {
    tokio::fs::create_dir_all(task_dir)
        .await
        .map_err(|e| io_error("create", task_dir, e))?;
    let seq = history(task_dir)
        .await?
        .last()
        .map_or(1, |(seq, _)| seq + 1);
    let path = task_dir.join(format!("{seq:010}.json"));
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error("write", &tmp, e))?;
    tokio::fs::rename(&tmp, &path).await.map_err(|e| {
        AdapterError::Checkpoint(format!("failed to move checkpoint into place: {e}"))
    })?;
    Ok(path)
}

impl FileCheckpointer {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding the checkpoints of `task_id`.
    ///
    /// Task ids come from callers, so anything that could escape the
    /// directory is rejected.
    fn task_dir(&self, task_id: &TaskId) -> Result<PathBuf, AdapterError> {
        let id = task_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AdapterError::Checkpoint(format!(
                "task id {id:?} cannot be used as a checkpoint directory name"
            )));
        }
        Ok(self.dir.join(id))
    }

    async fn lock_for(&self, task_id: &TaskId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(task_id.clone()).or_default())
    }

    /// Forget the task's lock once nobody else holds it.
    async fn release_lock(&self, task_id: &TaskId) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(task_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(task_id);
        }
    }

    #[cfg(test)]
    async fn tracked_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Remove the expired checkpoints of one task. Returns how many went.
    async fn expire_task(&self, task_dir: &Path, cutoff: DateTime<Utc>) -> Result<usize, AdapterError> {
        let mut removed = 0;
        let mut kept = 0;
        for (_, path) in history(task_dir).await? {
            match read_checkpoint(&path).await {
                Ok(Some(checkpoint)) if checkpoint.created_at < cutoff => {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(io_error("delete", &path, e)),
                    }
                }
                Ok(Some(_)) => kept += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint");
                    kept += 1;
                }
            }
        }
        if kept == 0 {
            // Leftover temp files keep the directory; that is fine.
            let _ = tokio::fs::remove_dir(task_dir).await;
        }
        Ok(removed)
    }
}

#[async_trait]
impl CheckpointerAdapter for FileCheckpointer {
    async fn save(&self, task_id: &TaskId, checkpoint: Checkpoint) -> Result<(), AdapterError> {
        check_owner(task_id, &checkpoint)?;
        let task_dir = self.task_dir(task_id)?;
        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| AdapterError::Checkpoint(format!("failed to encode checkpoint: {e}")))?;

        let written = {
            let lock = self.lock_for(task_id).await;
            let _guard = lock.lock().await;
            write_next(&task_dir, &bytes).await
        };
        self.release_lock(task_id).await;
        let path = written?;

        tracing::debug!(task_id = %task_id, path = %path.display(), "saved checkpoint");
        Ok(())
    }

    async fn load(&self, task_id: &TaskId) -> Result<Option<Checkpoint>, AdapterError> {
        let task_dir = self.task_dir(task_id)?;
        match history(&task_dir).await?.last() {
            Some((_, path)) => read_checkpoint(path).await,
            None => Ok(None),
        }
    }

    async fn delete(&self, task_id: &TaskId) -> Result<bool, AdapterError> {
        let task_dir = self.task_dir(task_id)?;
        let result = {
            let lock = self.lock_for(task_id).await;
            let _guard = lock.lock().await;
            match tokio::fs::remove_dir_all(&task_dir).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(io_error("delete", &task_dir, e)),
            }
        };
        self.release_lock(task_id).await;
        result
    }

    async fn list(
        &self,
        task_id: &TaskId,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, AdapterError> {
        let task_dir = self.task_dir(task_id)?;
        let mut checkpoints = Vec::new();
        for (_, path) in history(&task_dir)
            .await?
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
        {
            if let Some(checkpoint) = read_checkpoint(path).await? {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<usize, AdapterError> {
        let cutoff = expiry_cutoff(max_age);
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error("read", &self.dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("read", &self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let task_id = TaskId::from(name);
            let Ok(task_dir) = self.task_dir(&task_id) else {
                continue;
            };
            if !entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                continue;
            }

            let expired = {
                let lock = self.lock_for(&task_id).await;
                let _guard = lock.lock().await;
                self.expire_task(&task_dir, cutoff).await
            };
            self.release_lock(&task_id).await;
            removed += expired?;
        }

        if removed > 0 {
            tracing::info!(removed, dir = %self.dir.display(), "expired checkpoints");
        }
        Ok(removed)
    }

    fn supports_history(&self) -> bool {
        true
    }

    fn supports_ttl(&self) -> bool {
        true
    }
}
