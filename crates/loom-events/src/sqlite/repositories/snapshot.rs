//! State snapshot repository.
//!
//! Snapshots cache the [`EngineState`] after a given event. They are never
//! authoritative: the same state can always be rebuilt by replay.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::types::EngineState;

/// Snapshot repository. Stateless, every method takes `&Connection`.
pub struct SnapshotRepo;

impl SnapshotRepo {
    /// Store (or replace) the snapshot taken after `event_id`.
    pub fn upsert(
        conn: &Connection,
        event_id: &str,
        worldline_id: &str,
        state: &EngineState,
        created_at: &str,
    ) -> Result<()> {
        let json = serde_json::to_string(state)?;
        let _ = conn.execute(
            "INSERT INTO state_snapshots (event_id, worldline_id, state, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(event_id) DO UPDATE SET state = excluded.state,
                                                 created_at = excluded.created_at",
            params![event_id, worldline_id, json, created_at],
        )?;
        Ok(())
    }

    /// Snapshot taken after `event_id`, if any.
    pub fn get(conn: &Connection, event_id: &str) -> Result<Option<EngineState>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT state FROM state_snapshots WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|s| serde_json::from_str(&s)).transpose()?)
    }
}
