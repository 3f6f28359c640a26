//! Snapshot persistence.
//!
//! Persists the full task map to a single JSON file so a restarted server
//! comes back with the tasks it knew about. Loading tolerates a missing or
//! corrupt file (the server just starts empty); saving is atomic via a
//! write-temp-then-rename so a crashed write can never surface a half-written
//! file to the next load.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::{now_epoch, Snapshot, TaskRecord};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SnapshotFile<'a> {
    tasks: &'a Snapshot,
    version: &'static str,
    saved_at: f64,
}

/// JSON-file store for the task snapshot.
#[derive(Debug)]
pub struct Persister {
    path: PathBuf,
    // Serializes writers so concurrent saves cannot interleave tmp files.
    write_lock: Mutex<()>,
}

impl Persister {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Load the persisted task map, tagging every record as recovered.
    ///
    /// A missing file yields an empty map; an unreadable or corrupt file is
    /// logged and also yields an empty map. Individual records that fail to
    /// parse are skipped rather than failing the whole load.
    pub async fn load(&self) -> HashMap<String, TaskRecord> {
        if !self.path.exists() {
            return HashMap::new();
        }

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read persisted tasks from {}: {}", self.path.display(), e);
                return HashMap::new();
            }
        };
        let payload: serde_json::Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to parse persisted tasks from {}: {}", self.path.display(), e);
                return HashMap::new();
            }
        };
        let Some(tasks) = payload.get("tasks").and_then(|t| t.as_object()) else {
            warn!("Persisted file {} has no task map", self.path.display());
            return HashMap::new();
        };

        let now = now_epoch();
        let mut restored = HashMap::with_capacity(tasks.len());
        for (task_id, raw) in tasks {
            let mut record: TaskRecord = match serde_json::from_value(raw.clone()) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping unreadable persisted task {}: {}", task_id, e);
                    continue;
                }
            };
            record.task_id = task_id.clone();
            if record.created_at <= 0.0 {
                record.created_at = now;
            }
            if record.updated_at <= 0.0 {
                record.updated_at = record.created_at;
            }
            record.recovered = true;
            record.recovered_at = Some(now);
            restored.insert(task_id.clone(), record);
        }
        info!(
            "Restored {} task(s) from {}",
            restored.len(),
            self.path.display()
        );
        restored
    }

    /// Write the snapshot to disk atomically.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        let payload = serde_json::to_string(&SnapshotFile {
            tasks: snapshot,
            version: env!("CARGO_PKG_VERSION"),
            saved_at: now_epoch(),
        })?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
