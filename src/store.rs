//! In-memory task state store.
//!
//! The [`TaskStore`] is the single source of truth for the latest known state
//! of every reported task. Inbound progress events are merged into it, the
//! lifecycle sweeper ages records out of it, and everything the dashboards see
//! is a point-in-time snapshot cloned out of it.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::sweep::{SweepOutcome, SweepPolicy};

/// Current unix time as float seconds, matching the wire format.
pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task_id must be a non-empty string")]
    EmptyTaskId,
}

/// Lifecycle status of a task, as reported by clients or derived by the sweeper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// First report for a unit of work.
    Start,
    /// Normal progress report.
    #[default]
    Update,
    /// Marked by the sweeper after the configured idle window (clients may
    /// also set it directly).
    Stale,
    /// Work finished; kept visible until the retention window passes.
    Close,
}

/// One progress report received from a client.
///
/// Absent fields leave the stored record untouched; only `status` has a
/// default (`update`) applied when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressEvent {
    /// Unique identifier for this task.
    pub task_id: String,
    /// Human readable description.
    pub desc: Option<String>,
    /// Total units of work.
    pub total: Option<f64>,
    /// Completed units of work.
    pub n: Option<f64>,
    /// Display unit for the work done.
    pub unit: Option<String>,
    pub status: Option<TaskStatus>,
    /// Unix epoch seconds for the event, per the client's clock.
    pub timestamp: Option<f64>,
    /// Free-form metadata, merged key-by-key into the record.
    pub meta: Option<BTreeMap<String, serde_json::Value>>,
}

/// Latest known state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default)]
    pub n: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Set on the first event for this id, immutable afterwards.
    #[serde(default)]
    pub created_at: f64,
    /// The event's own timestamp when supplied, receipt time otherwise.
    #[serde(default)]
    pub updated_at: f64,
    /// Stamped once when the task first reaches `close`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at: Option<f64>,
    /// Stamped once when the sweeper first marks the task stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_at: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
    /// Transient marker for records restored from disk at startup; cleared by
    /// the next real event.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<f64>,
}

impl TaskRecord {
    fn new(task_id: String, now: f64) -> Self {
        Self {
            task_id,
            desc: None,
            total: None,
            n: 0.0,
            unit: None,
            status: TaskStatus::Start,
            created_at: now,
            updated_at: now,
            done_at: None,
            stale_at: None,
            meta: BTreeMap::new(),
            recovered: false,
            recovered_at: None,
        }
    }
}

/// Ordered point-in-time copy of every task's latest state.
pub type Snapshot = BTreeMap<String, TaskRecord>;

/// Concurrent map from task id to its latest record.
///
/// All mutation paths (event application, deletion, sweeping) take the write
/// lock for pure in-memory work only; persistence and broadcast always run
/// against a snapshot cloned outside the lock.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one progress event into the store and return the resulting record.
    ///
    /// Creates the record on first sight of the `task_id`. Fields absent from
    /// the event keep their stored values; `meta` is merged key-by-key. An
    /// omitted `status` becomes `update`.
    pub async fn apply(&self, event: ProgressEvent) -> Result<TaskRecord, StoreError> {
        if event.task_id.is_empty() {
            return Err(StoreError::EmptyTaskId);
        }

        let event_time = event.timestamp.unwrap_or_else(now_epoch);
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .entry(event.task_id.clone())
            .or_insert_with(|| TaskRecord::new(event.task_id.clone(), event_time));

        if let Some(desc) = event.desc {
            record.desc = Some(desc);
        }
        if let Some(total) = event.total {
            record.total = Some(total);
        }
        if let Some(n) = event.n {
            record.n = n;
        }
        if let Some(unit) = event.unit {
            record.unit = Some(unit);
        }
        if let Some(meta) = event.meta {
            for (key, value) in meta {
                record.meta.insert(key, value);
            }
        }

        record.status = event.status.unwrap_or(TaskStatus::Update);
        record.updated_at = event_time;

        if record.status == TaskStatus::Close && record.done_at.is_none() {
            record.done_at = Some(event_time);
        }

        record.recovered = false;
        record.recovered_at = None;

        Ok(record.clone())
    }

    /// Ordered point-in-time copy of all records.
    pub async fn snapshot(&self) -> Snapshot {
        let tasks = self.tasks.read().await;
        tasks
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Remove one record; returns whether it existed.
    pub async fn delete(&self, task_id: &str) -> bool {
        self.tasks.write().await.remove(task_id).is_some()
    }

    /// Remove every record matching both filters (either may be `None`).
    ///
    /// `older_than` is an age in seconds measured against `updated_at`.
    pub async fn delete_where(&self, status: Option<TaskStatus>, older_than: Option<f64>) -> usize {
        let cutoff = older_than.map(|age| now_epoch() - age);
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, record| {
            if let Some(wanted) = status {
                if record.status != wanted {
                    return true;
                }
            }
            if let Some(cutoff) = cutoff {
                if record.updated_at > cutoff {
                    return true;
                }
            }
            false
        });
        before - tasks.len()
    }

    /// One lifecycle pass at virtual time `now`: max-age eviction first, then
    /// stale marking, then retention eviction of closed records.
    pub async fn sweep(&self, policy: &SweepPolicy, now: f64) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let mut tasks = self.tasks.write().await;

        if policy.max_task_age > 0.0 {
            let before = tasks.len();
            tasks.retain(|_, record| now - record.updated_at <= policy.max_task_age);
            outcome.evicted += before - tasks.len();
        }

        if policy.stale_seconds > 0.0 {
            for record in tasks.values_mut() {
                if matches!(record.status, TaskStatus::Close | TaskStatus::Stale) {
                    continue;
                }
                if now - record.updated_at > policy.stale_seconds {
                    record.status = TaskStatus::Stale;
                    if record.stale_at.is_none() {
                        record.stale_at = Some(now);
                    }
                    outcome.marked_stale += 1;
                }
            }
        }

        if policy.retention_seconds > 0.0 {
            let before = tasks.len();
            tasks.retain(|_, record| {
                record.status != TaskStatus::Close
                    || now - record.updated_at <= policy.retention_seconds
            });
            outcome.evicted += before - tasks.len();
        }

        outcome
    }

    /// Seed the store with records restored from disk. Startup only.
    pub async fn restore(&self, records: HashMap<String, TaskRecord>) {
        let mut tasks = self.tasks.write().await;
        tasks.extend(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(task_id: &str) -> ProgressEvent {
        ProgressEvent {
            task_id: task_id.to_string(),
            desc: None,
            total: None,
            n: None,
            unit: None,
            status: None,
            timestamp: None,
            meta: None,
        }
    }

    #[tokio::test]
    async fn first_event_creates_record() {
        let store = TaskStore::new();
        let mut ev = event("a");
        ev.status = Some(TaskStatus::Start);
        ev.total = Some(100.0);
        ev.n = Some(0.0);
        ev.timestamp = Some(1000.0);

        let record = store.apply(ev).await.unwrap();
        assert_eq!(record.task_id, "a");
        assert_eq!(record.status, TaskStatus::Start);
        assert_eq!(record.total, Some(100.0));
        assert_eq!(record.n, 0.0);
        assert_eq!(record.created_at, 1000.0);
        assert_eq!(record.updated_at, 1000.0);
    }

    #[tokio::test]
    async fn partial_update_preserves_absent_fields() {
        let store = TaskStore::new();
        let mut first = event("a");
        first.status = Some(TaskStatus::Start);
        first.total = Some(100.0);
        first.n = Some(0.0);
        first.desc = Some("work".to_string());
        store.apply(first).await.unwrap();

        let mut second = event("a");
        second.n = Some(50.0);
        let record = store.apply(second).await.unwrap();

        assert_eq!(record.total, Some(100.0));
        assert_eq!(record.n, 50.0);
        assert_eq!(record.desc.as_deref(), Some("work"));
        // Omitted status falls back to `update`, even over a previous `start`.
        assert_eq!(record.status, TaskStatus::Update);
    }

    #[tokio::test]
    async fn created_at_never_changes() {
        let store = TaskStore::new();
        let mut first = event("a");
        first.timestamp = Some(1000.0);
        let created = store.apply(first).await.unwrap().created_at;

        let mut second = event("a");
        second.timestamp = Some(2000.0);
        let record = store.apply(second).await.unwrap();

        assert_eq!(record.created_at, created);
        assert_eq!(record.updated_at, 2000.0);
    }

    #[tokio::test]
    async fn reapply_is_idempotent_except_updated_at() {
        let store = TaskStore::new();
        let mut ev = event("a");
        ev.n = Some(5.0);
        ev.desc = Some("step".to_string());

        let first = store.apply(ev.clone()).await.unwrap();
        let second = store.apply(ev).await.unwrap();

        let mut normalized = second.clone();
        normalized.updated_at = first.updated_at;
        assert_eq!(normalized, first);
    }

    #[tokio::test]
    async fn meta_is_merged_key_by_key() {
        let store = TaskStore::new();
        let mut first = event("a");
        first.meta = Some(BTreeMap::from([
            ("host".to_string(), serde_json::json!("worker-1")),
            ("attempt".to_string(), serde_json::json!(1)),
        ]));
        store.apply(first).await.unwrap();

        let mut second = event("a");
        second.meta = Some(BTreeMap::from([
            ("attempt".to_string(), serde_json::json!(2)),
            ("gpu".to_string(), serde_json::json!(true)),
        ]));
        let record = store.apply(second).await.unwrap();

        assert_eq!(record.meta["host"], serde_json::json!("worker-1"));
        assert_eq!(record.meta["attempt"], serde_json::json!(2));
        assert_eq!(record.meta["gpu"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn empty_task_id_is_rejected_without_side_effects() {
        let store = TaskStore::new();
        let err = store.apply(event("")).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyTaskId));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = TaskStore::new();
        store.apply(event("a")).await.unwrap();
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn delete_where_filters_by_status() {
        let store = TaskStore::new();
        for id in ["a", "b"] {
            let mut ev = event(id);
            ev.status = Some(TaskStatus::Close);
            store.apply(ev).await.unwrap();
        }
        let mut active = event("c");
        active.status = Some(TaskStatus::Update);
        store.apply(active).await.unwrap();

        let removed = store.delete_where(Some(TaskStatus::Close), None).await;
        assert_eq!(removed, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.snapshot().await.contains_key("c"));
    }

    #[tokio::test]
    async fn delete_where_combines_status_and_age() {
        let store = TaskStore::new();
        let now = now_epoch();

        let mut old_closed = event("old");
        old_closed.status = Some(TaskStatus::Close);
        old_closed.timestamp = Some(now - 200.0);
        store.apply(old_closed).await.unwrap();

        let mut fresh_closed = event("fresh");
        fresh_closed.status = Some(TaskStatus::Close);
        fresh_closed.timestamp = Some(now);
        store.apply(fresh_closed).await.unwrap();

        let mut old_active = event("active");
        old_active.timestamp = Some(now - 200.0);
        store.apply(old_active).await.unwrap();

        let removed = store
            .delete_where(Some(TaskStatus::Close), Some(100.0))
            .await;
        assert_eq!(removed, 1);
        let snapshot = store.snapshot().await;
        assert!(!snapshot.contains_key("old"));
        assert!(snapshot.contains_key("fresh"));
        assert!(snapshot.contains_key("active"));
    }

    #[tokio::test]
    async fn close_stamps_done_at_once() {
        let store = TaskStore::new();
        let mut first = event("a");
        first.status = Some(TaskStatus::Close);
        first.timestamp = Some(1000.0);
        let record = store.apply(first).await.unwrap();
        assert_eq!(record.done_at, Some(1000.0));

        let mut again = event("a");
        again.status = Some(TaskStatus::Close);
        again.timestamp = Some(2000.0);
        let record = store.apply(again).await.unwrap();
        assert_eq!(record.done_at, Some(1000.0));
    }

    #[tokio::test]
    async fn next_event_clears_recovery_tags() {
        let store = TaskStore::new();
        let mut restored = TaskRecord::new("a".to_string(), 1000.0);
        restored.recovered = true;
        restored.recovered_at = Some(1000.0);
        store
            .restore(HashMap::from([("a".to_string(), restored)]))
            .await;

        let record = store.apply(event("a")).await.unwrap();
        assert!(!record.recovered);
        assert_eq!(record.recovered_at, None);
    }

    #[tokio::test]
    async fn snapshot_is_ordered_by_task_id() {
        let store = TaskStore::new();
        for id in ["c", "a", "b"] {
            store.apply(event(id)).await.unwrap();
        }
        let keys: Vec<_> = store.snapshot().await.into_keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
