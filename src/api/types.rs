//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::store::{Snapshot, TaskRecord, TaskStatus};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,

    /// Number of tasks currently tracked
    pub tasks: usize,
}

/// Full-state snapshot, also the shape pushed to WebSocket observers.
#[derive(Debug, Clone, Serialize)]
pub struct TasksResponse {
    pub tasks: Snapshot,
}

/// Ack for an accepted progress event, echoing the normalized record.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressResponse {
    pub ok: bool,
    pub task: TaskRecord,
}

/// Result of a single-task deletion.
#[derive(Debug, Clone, Serialize)]
pub struct RemovedResponse {
    pub removed: bool,
}

/// Result of a bulk deletion.
#[derive(Debug, Clone, Serialize)]
pub struct BulkRemovedResponse {
    pub removed: usize,
}

/// Query parameters accepted by authenticated endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct AuthQuery {
    pub token: Option<String>,
}

/// Query parameters for bulk deletion.
#[derive(Debug, Deserialize)]
pub struct BulkDeleteQuery {
    pub token: Option<String>,

    /// Only remove tasks with this status
    pub status: Option<TaskStatus>,

    /// Only remove tasks idle for more than this many seconds
    pub older_than: Option<f64>,
}
