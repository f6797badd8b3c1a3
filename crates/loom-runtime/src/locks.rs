//! Per-worldline mutual exclusion.
//!
//! At most one turn (interactive, background, or subagent child) runs against
//! a worldline at a time. Interactive turns wait for the lock; scheduler
//! workers only try it and move on to other jobs. A slot is dropped from the
//! table when its last holder releases it with nobody waiting.

use std::sync::Arc;

use dashmap::DashMap;
use loom_core::WorldlineId;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::debug;

type Slots = DashMap<String, Arc<Mutex<()>>>;

/// Lock table keyed by worldline id.
#[derive(Debug, Default)]
pub struct WorldlineLocks {
    locks: Arc<Slots>,
    released: Arc<Notify>,
}

/// Held while a turn runs. Releasing wakes waiting scheduler workers.
#[derive(Debug)]
pub struct WorldlineGuard {
    worldline_id: WorldlineId,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Slots>,
    released: Arc<Notify>,
}

impl WorldlineGuard {
    /// Worldline this guard holds.
    #[must_use]
    pub fn worldline_id(&self) -> &WorldlineId {
        &self.worldline_id
    }
}

impl Drop for WorldlineGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own reference left: no holder and no waiter.
        let _ = self
            .slots
            .remove_if(self.worldline_id.as_str(), |_, slot| Arc::strong_count(slot) == 1);
        debug!(worldline_id = %self.worldline_id, "worldline released");
        self.released.notify_waiters();
    }
}

impl WorldlineLocks {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, worldline_id: &WorldlineId) -> Arc<Mutex<()>> {
        self.locks
            .entry(worldline_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Take the lock if free.
    pub fn try_acquire(&self, worldline_id: &WorldlineId) -> Option<WorldlineGuard> {
        let guard = self.slot(worldline_id).try_lock_owned().ok()?;
        Some(self.wrap(worldline_id, guard))
    }

    /// Wait for the lock.
    pub async fn acquire(&self, worldline_id: &WorldlineId) -> WorldlineGuard {
        let guard = self.slot(worldline_id).lock_owned().await;
        self.wrap(worldline_id, guard)
    }

    /// Whether a turn currently holds the worldline.
    #[must_use]
    pub fn is_busy(&self, worldline_id: &WorldlineId) -> bool {
        self.locks
            .get(worldline_id.as_str())
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Worldlines currently held.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.locks.iter().filter(|slot| slot.value().try_lock().is_err()).count()
    }

    /// Worldlines with a slot in the table, held or awaited.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.locks.len()
    }

    /// Notified whenever any worldline is released.
    #[must_use]
    pub fn released(&self) -> Arc<Notify> {
        Arc::clone(&self.released)
    }

    fn wrap(&self, worldline_id: &WorldlineId, guard: OwnedMutexGuard<()>) -> WorldlineGuard {
        debug!(worldline_id = %worldline_id, "worldline acquired");
        WorldlineGuard {
            worldline_id: worldline_id.clone(),
            guard: Some(guard),
            slots: Arc::clone(&self.locks),
            released: Arc::clone(&self.released),
        }
    }
}
