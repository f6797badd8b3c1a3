//! Event repository: the append-only log.
//!
//! Events form singly-linked chains via `parent_event_id`. A branch's chain
//! crosses into its ancestors' events, so chain walks are by id, never by
//! worldline.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::sqlite::row_types::EventRow;
use crate::types::{Event, EventType};

const EVENT_COLUMNS: &str =
    "id, worldline_id, sequence, parent_event_id, type, payload, created_at";

/// Upper bound on chain length walked by the recursive CTE.
const MAX_CHAIN_DEPTH: i64 = 1_000_000;

/// Event repository. Stateless, every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Insert a single event, denormalizing `turn_id` and `call_id`.
    pub fn insert(conn: &Connection, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        let _ = conn.execute(
            "INSERT INTO events (id, worldline_id, sequence, parent_event_id, type, payload,
                                 turn_id, call_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id.as_str(),
                event.worldline_id.as_str(),
                event.sequence,
                event.parent_event_id.as_deref(),
                event.event_type.as_str(),
                payload,
                event.turn_id(),
                event.call_id(),
                event.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a single event by ID.
    pub fn get_by_id(conn: &Connection, event_id: &str) -> Result<Option<Event>> {
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![event_id],
                Self::map_row,
            )
            .optional()?;
        row.map(Event::try_from).transpose()
    }

    /// Parent pointer of an event: `None` if the event does not exist,
    /// `Some(None)` for a root event.
    pub fn get_parent_id(conn: &Connection, event_id: &str) -> Result<Option<Option<String>>> {
        let parent = conn
            .query_row(
                "SELECT parent_event_id FROM events WHERE id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parent)
    }

    /// Events owned by a worldline with `sequence > after_sequence`, in append order.
    pub fn list_by_worldline(
        conn: &Connection,
        worldline_id: &str,
        after_sequence: i64,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE worldline_id = ?1 AND sequence > ?2
             ORDER BY sequence ASC LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![worldline_id, after_sequence, limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(Event::try_from).collect()
    }

    /// Chain from the root to `event_id` (inclusive), oldest first.
    pub fn get_chain(conn: &Connection, event_id: &str) -> Result<Vec<Event>> {
        let mut stmt = conn.prepare(
            "WITH RECURSIVE chain(id, worldline_id, sequence, parent_event_id, type, payload,
                                  created_at, lvl) AS (
               SELECT id, worldline_id, sequence, parent_event_id, type, payload, created_at, 0
               FROM events WHERE id = ?1
               UNION ALL
               SELECT e.id, e.worldline_id, e.sequence, e.parent_event_id, e.type, e.payload,
                      e.created_at, c.lvl + 1
               FROM events e JOIN chain c ON e.id = c.parent_event_id
               WHERE c.lvl < ?2
             )
             SELECT id, worldline_id, sequence, parent_event_id, type, payload, created_at
             FROM chain ORDER BY lvl DESC",
        )?;
        let rows = stmt
            .query_map(params![event_id, MAX_CHAIN_DEPTH], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(Event::try_from).collect()
    }

    /// Next sequence number for a worldline.
    pub fn next_sequence(conn: &Connection, worldline_id: &str) -> Result<i64> {
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(sequence) FROM events WHERE worldline_id = ?1",
            params![worldline_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Count events owned by a worldline.
    pub fn count_by_worldline(conn: &Connection, worldline_id: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE worldline_id = ?1",
            params![worldline_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Count events of the given types owned by a worldline.
    pub fn count_by_types(
        conn: &Connection,
        worldline_id: &str,
        types: &[EventType],
    ) -> Result<i64> {
        let mut total = 0;
        for event_type in types {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM events WHERE worldline_id = ?1 AND type = ?2",
                params![worldline_id, event_type.as_str()],
                |row| row.get(0),
            )?;
            total += count;
        }
        Ok(total)
    }

    /// Creation time of the newest event owned by a worldline.
    pub fn last_created_at(conn: &Connection, worldline_id: &str) -> Result<Option<String>> {
        let ts = conn.query_row(
            "SELECT MAX(created_at) FROM events WHERE worldline_id = ?1",
            params![worldline_id],
            |row| row.get(0),
        )?;
        Ok(ts)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
        Ok(EventRow {
            id: row.get(0)?,
            worldline_id: row.get(1)?,
            sequence: row.get(2)?,
            parent_event_id: row.get(3)?,
            event_type: row.get(4)?,
            payload: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
