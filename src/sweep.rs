//! Background lifecycle sweeper.
//!
//! Ages records out of the [`TaskStore`](crate::store::TaskStore) on a fixed
//! interval: tasks idle past `stale_seconds` are flagged stale, closed tasks
//! past `retention_seconds` are evicted, and anything past `max_task_age` is
//! evicted regardless of status. A sweep that changed anything persists and
//! broadcasts exactly one updated snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::persist::Persister;
use crate::store::{now_epoch, TaskStore};

/// Shortest tick we will schedule, so a zero/negative interval cannot spin.
const MIN_INTERVAL_SECONDS: f64 = 0.05;

/// Age thresholds driving one sweep pass. A threshold of `0` disables its rule.
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Idle seconds before an active task is flagged stale.
    pub stale_seconds: f64,
    /// Seconds a closed task stays visible before eviction.
    pub retention_seconds: f64,
    /// Hard ceiling on idle age for any task, whatever its status.
    pub max_task_age: f64,
}

/// What one sweep pass did to the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub evicted: usize,
    pub marked_stale: usize,
}

impl SweepOutcome {
    pub fn changed(&self) -> bool {
        self.evicted > 0 || self.marked_stale > 0
    }
}

/// Run the sweep loop until `shutdown` flips.
///
/// Persistence failures are logged and never stop the next tick.
pub async fn run(
    store: Arc<TaskStore>,
    broadcaster: Arc<Broadcaster>,
    persister: Option<Arc<Persister>>,
    policy: SweepPolicy,
    cleanup_interval: f64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval = cleanup_interval,
        stale = policy.stale_seconds,
        retention = policy.retention_seconds,
        max_age = policy.max_task_age,
        "Starting lifecycle sweep loop"
    );

    let period = Duration::from_secs_f64(cleanup_interval.max(MIN_INTERVAL_SECONDS));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of `interval` fires immediately; skip it so the loop
    // matches a sleep-then-sweep cadence.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("Lifecycle sweep loop stopped");
                return;
            }
        }

        let outcome = store.sweep(&policy, now_epoch()).await;
        if !outcome.changed() {
            continue;
        }
        debug!(
            evicted = outcome.evicted,
            marked_stale = outcome.marked_stale,
            "Sweep changed task state"
        );

        let snapshot = store.snapshot().await;
        if let Some(persister) = &persister {
            if let Err(e) = persister.save(&snapshot).await {
                warn!("Failed to persist tasks after sweep: {}", e);
            }
        }
        broadcaster.publish(Arc::new(snapshot)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ProgressEvent, TaskStatus};

    fn event(task_id: &str, status: TaskStatus, timestamp: f64) -> ProgressEvent {
        ProgressEvent {
            task_id: task_id.to_string(),
            desc: None,
            total: None,
            n: None,
            unit: None,
            status: Some(status),
            timestamp: Some(timestamp),
            meta: None,
        }
    }

    fn policy(stale: f64, retention: f64, max_age: f64) -> SweepPolicy {
        SweepPolicy {
            stale_seconds: stale,
            retention_seconds: retention,
            max_task_age: max_age,
        }
    }

    #[tokio::test]
    async fn idle_active_task_is_marked_stale() {
        let store = TaskStore::new();
        store
            .apply(event("c", TaskStatus::Update, 1000.0))
            .await
            .unwrap();

        let outcome = store.sweep(&policy(10.0, 0.0, 0.0), 1011.0).await;
        assert_eq!(outcome.marked_stale, 1);

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot["c"].status, TaskStatus::Stale);
        assert_eq!(snapshot["c"].stale_at, Some(1011.0));
    }

    #[tokio::test]
    async fn fresh_task_is_not_marked_stale() {
        let store = TaskStore::new();
        store
            .apply(event("c", TaskStatus::Update, 1000.0))
            .await
            .unwrap();

        let outcome = store.sweep(&policy(10.0, 0.0, 0.0), 1009.0).await;
        assert!(!outcome.changed());
        assert_eq!(store.snapshot().await["c"].status, TaskStatus::Update);
    }

    #[tokio::test]
    async fn stale_marking_disabled_when_threshold_is_zero() {
        let store = TaskStore::new();
        store
            .apply(event("c", TaskStatus::Update, 1000.0))
            .await
            .unwrap();

        let outcome = store.sweep(&policy(0.0, 0.0, 0.0), 99999.0).await;
        assert!(!outcome.changed());
        assert_eq!(store.snapshot().await["c"].status, TaskStatus::Update);
    }

    #[tokio::test]
    async fn closed_tasks_are_never_marked_stale() {
        let store = TaskStore::new();
        store
            .apply(event("b", TaskStatus::Close, 1000.0))
            .await
            .unwrap();

        store.sweep(&policy(10.0, 0.0, 0.0), 2000.0).await;
        assert_eq!(store.snapshot().await["b"].status, TaskStatus::Close);
    }

    #[tokio::test]
    async fn stale_at_is_stamped_once() {
        let store = TaskStore::new();
        store
            .apply(event("c", TaskStatus::Update, 1000.0))
            .await
            .unwrap();

        store.sweep(&policy(10.0, 0.0, 0.0), 1020.0).await;
        // Client reports again, then goes idle a second time.
        store
            .apply(event("c", TaskStatus::Stale, 1030.0))
            .await
            .unwrap();
        store.sweep(&policy(10.0, 0.0, 0.0), 1050.0).await;

        assert_eq!(store.snapshot().await["c"].stale_at, Some(1020.0));
    }

    #[tokio::test]
    async fn closed_task_evicted_only_after_retention_window() {
        let store = TaskStore::new();
        store
            .apply(event("b", TaskStatus::Close, 1000.0))
            .await
            .unwrap();
        let retention = policy(0.0, 120.0, 0.0);

        let outcome = store.sweep(&retention, 1119.0).await;
        assert!(!outcome.changed());
        assert!(store.snapshot().await.contains_key("b"));

        let outcome = store.sweep(&retention, 1121.0).await;
        assert_eq!(outcome.evicted, 1);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn retention_leaves_active_tasks_alone() {
        let store = TaskStore::new();
        store
            .apply(event("a", TaskStatus::Update, 1000.0))
            .await
            .unwrap();

        store.sweep(&policy(0.0, 120.0, 0.0), 99999.0).await;
        assert!(store.snapshot().await.contains_key("a"));
    }

    #[tokio::test]
    async fn max_age_evicts_regardless_of_status() {
        let store = TaskStore::new();
        store
            .apply(event("a", TaskStatus::Update, 1000.0))
            .await
            .unwrap();

        // Younger than the stale threshold, older than the age ceiling: the
        // ceiling wins and the record is gone before stale marking runs.
        let outcome = store.sweep(&policy(100.0, 0.0, 50.0), 1060.0).await;
        assert_eq!(outcome.evicted, 1);
        assert_eq!(outcome.marked_stale, 0);
        assert!(store.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn one_sweep_applies_all_rules() {
        let store = TaskStore::new();
        store
            .apply(event("ancient", TaskStatus::Update, 0.0))
            .await
            .unwrap();
        store
            .apply(event("idle", TaskStatus::Start, 900.0))
            .await
            .unwrap();
        store
            .apply(event("finished", TaskStatus::Close, 800.0))
            .await
            .unwrap();
        store
            .apply(event("fresh", TaskStatus::Update, 999.0))
            .await
            .unwrap();

        let outcome = store.sweep(&policy(50.0, 120.0, 500.0), 1000.0).await;
        assert_eq!(outcome.evicted, 2); // "ancient" by age, "finished" by retention
        assert_eq!(outcome.marked_stale, 1); // "idle"

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["idle"].status, TaskStatus::Stale);
        assert_eq!(snapshot["fresh"].status, TaskStatus::Update);
    }
}
