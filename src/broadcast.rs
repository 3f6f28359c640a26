//! Snapshot fan-out to connected observers.
//!
//! Delivery is best-effort latest-state: each observer gets a small bounded
//! queue of snapshots, and an observer that stops draining it is dropped
//! rather than allowed to hold up ingestion or its peers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::store::Snapshot;

/// Per-observer queue depth. Overflow means the observer is too slow to keep
/// up with state changes and gets disconnected.
const WATCHER_BUFFER: usize = 16;

/// Receiving side of one observer registration.
///
/// Dropping the handle (or just its receiver) ends delivery; the registry
/// entry is reaped on the next publish.
pub struct Watcher {
    pub id: Uuid,
    pub rx: mpsc::Receiver<Arc<Snapshot>>,
}

/// Registry of connected observers.
#[derive(Debug, Default)]
pub struct Broadcaster {
    watchers: RwLock<HashMap<Uuid, mpsc::Sender<Arc<Snapshot>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer. The current snapshot is queued before the
    /// registration is visible, so the observer always sees state from no
    /// later than subscribe time before any subsequent update.
    pub async fn subscribe(&self, catch_up: Snapshot) -> Watcher {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(WATCHER_BUFFER);
        let _ = tx.try_send(Arc::new(catch_up));
        self.watchers.write().await.insert(id, tx);
        debug!(watcher = %id, "Observer subscribed");
        Watcher { id, rx }
    }

    /// Remove an observer. Removing an unknown id is a no-op.
    pub async fn unsubscribe(&self, id: Uuid) {
        if self.watchers.write().await.remove(&id).is_some() {
            debug!(watcher = %id, "Observer unsubscribed");
        }
    }

    /// Push a snapshot to every observer without ever blocking.
    ///
    /// An observer whose queue is full or whose receiver is gone is dropped
    /// from the registry; the failure never reaches the caller.
    pub async fn publish(&self, snapshot: Arc<Snapshot>) {
        let mut dead: Vec<Uuid> = Vec::new();
        {
            let watchers = self.watchers.read().await;
            if watchers.is_empty() {
                return;
            }
            for (id, tx) in watchers.iter() {
                if tx.try_send(Arc::clone(&snapshot)).is_err() {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut watchers = self.watchers.write().await;
            for id in dead {
                watchers.remove(&id);
                debug!(watcher = %id, "Dropping unresponsive observer");
            }
        }
    }

    pub async fn watcher_count(&self) -> usize {
        self.watchers.read().await.len()
    }
}
