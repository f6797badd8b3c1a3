//! Engine-state restore for branches.
//!
//! Before any tool runs on a fresh branch, the executor must see exactly the
//! tables and sources that existed at the fork event. The state is taken from
//! the newest snapshot at or before the fork event, then any state-mutating
//! events between that snapshot and the fork are replayed. Without a
//! snapshot, every state-mutating event from the root through the fork event
//! is replayed in chain order. Nothing appended after the fork is applied.

use loom_core::{EventId, WorldlineId, now_rfc3339};
use serde::Serialize;
use tracing::{debug, info};

use super::manager::{WorldlineManager, checked_chain};
use crate::errors::{EventStoreError, Result};
use crate::sqlite::repositories::{SnapshotRepo, WorldlineRepo};
use crate::types::EngineState;

/// How a [`RestoredState`] was obtained.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreSource {
    /// Loaded from the snapshot after `event_id`, then `replayed` events applied.
    Snapshot {
        /// Event the snapshot was taken after.
        event_id: EventId,
        /// State-mutating events replayed on top.
        replayed: usize,
    },
    /// Rebuilt from the root by replaying `replayed` events.
    Replay {
        /// State-mutating events replayed.
        replayed: usize,
    },
}

/// Engine state at a given event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RestoredState {
    /// Reconstructed state.
    pub state: EngineState,
    /// Where it came from.
    pub source: RestoreSource,
}

impl WorldlineManager {
    /// Engine state immediately after `event_id`.
    pub fn state_at(&self, worldline_id: &WorldlineId, event_id: &EventId) -> Result<RestoredState> {
        let conn = self.store().conn()?;
        let chain = checked_chain(&conn, worldline_id, event_id)?;
        if chain.is_empty() {
            return Err(EventStoreError::EventNotFound(event_id.to_string()));
        }

        let mut base = None;
        for (idx, event) in chain.iter().enumerate().rev() {
            if let Some(state) = SnapshotRepo::get(&conn, &event.id)? {
                base = Some((idx, state));
                break;
            }
        }

        let (start, mut state, snapshot_event) = match base {
            Some((idx, state)) => (idx + 1, state, Some(chain[idx].id.clone())),
            None => (0, EngineState::default(), None),
        };

        let mut replayed = 0;
        for event in &chain[start..] {
            if state.apply_event(event)? {
                replayed += 1;
            }
        }

        let source = match snapshot_event {
            Some(event_id) => RestoreSource::Snapshot { event_id, replayed },
            None => RestoreSource::Replay { replayed },
        };
        debug!(worldline_id = %worldline_id, event_id = %event_id, ?source, "engine state resolved");
        Ok(RestoredState { state, source })
    }

    /// State the executor must load before the next tool call on
    /// `worldline_id`, or `None` when no restore is pending.
    pub fn pending_restore(&self, worldline_id: &WorldlineId) -> Result<Option<RestoredState>> {
        let worldline = self.store().get_worldline(worldline_id)?;
        if !worldline.needs_state_restore {
            return Ok(None);
        }
        match &worldline.forked_from_event_id {
            Some(fork) => self.state_at(worldline_id, fork).map(Some),
            None => Ok(None),
        }
    }

    /// Clear the pending-restore flag once the executor has loaded the state.
    pub fn mark_state_restored(&self, worldline_id: &WorldlineId) -> Result<()> {
        if !WorldlineRepo::mark_state_restored(&*self.store().conn()?, worldline_id)? {
            return Err(EventStoreError::WorldlineNotFound(worldline_id.to_string()));
        }
        info!(worldline_id = %worldline_id, "engine state restored");
        Ok(())
    }

    /// Compute and store the engine state after `event_id`.
    pub fn capture_snapshot(
        &self,
        worldline_id: &WorldlineId,
        event_id: &EventId,
    ) -> Result<EngineState> {
        let restored = self.state_at(worldline_id, event_id)?;
        SnapshotRepo::upsert(
            &*self.store().conn()?,
            event_id,
            worldline_id,
            &restored.state,
            &now_rfc3339(),
        )?;
        debug!(worldline_id = %worldline_id, event_id = %event_id, "snapshot captured");
        Ok(restored.state)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
