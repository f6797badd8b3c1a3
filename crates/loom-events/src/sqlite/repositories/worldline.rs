//! Worldline repository: head pointers and branch metadata.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::types::Worldline;

const WORLDLINE_COLUMNS: &str = "id, thread_id, parent_worldline_id, forked_from_event_id, \
     head_event_id, name, needs_state_restore, created_at";

/// Worldline repository. Stateless, every method takes `&Connection`.
pub struct WorldlineRepo;

impl WorldlineRepo {
    /// Insert a worldline row.
    pub fn insert(conn: &Connection, worldline: &Worldline) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO worldlines (id, thread_id, parent_worldline_id, forked_from_event_id,
                                     head_event_id, name, needs_state_restore, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                worldline.id.as_str(),
                worldline.thread_id.as_str(),
                worldline.parent_worldline_id.as_deref(),
                worldline.forked_from_event_id.as_deref(),
                worldline.head_event_id.as_deref(),
                worldline.name,
                worldline.needs_state_restore,
                worldline.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a worldline by ID.
    pub fn get(conn: &Connection, worldline_id: &str) -> Result<Option<Worldline>> {
        let row = conn
            .query_row(
                &format!("SELECT {WORLDLINE_COLUMNS} FROM worldlines WHERE id = ?1"),
                params![worldline_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Worldlines of a thread in creation order.
    pub fn list_by_thread(conn: &Connection, thread_id: &str) -> Result<Vec<Worldline>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {WORLDLINE_COLUMNS} FROM worldlines WHERE thread_id = ?1
             ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![thread_id], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Current head: `None` if the worldline does not exist, `Some(None)` if empty.
    pub fn get_head(conn: &Connection, worldline_id: &str) -> Result<Option<Option<String>>> {
        let head = conn
            .query_row(
                "SELECT head_event_id FROM worldlines WHERE id = ?1",
                params![worldline_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(head)
    }

    /// Move the head from `expected` to `new_head`. Returns `false` when the
    /// stored head no longer equals `expected`.
    pub fn advance_head(
        conn: &Connection,
        worldline_id: &str,
        expected: Option<&str>,
        new_head: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE worldlines SET head_event_id = ?1
             WHERE id = ?2 AND head_event_id IS ?3",
            params![new_head, worldline_id, expected],
        )?;
        Ok(changed == 1)
    }

    /// Clear the pending-restore flag.
    pub fn mark_state_restored(conn: &Connection, worldline_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE worldlines SET needs_state_restore = 0 WHERE id = ?1",
            params![worldline_id],
        )?;
        Ok(changed == 1)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Worldline> {
        Ok(Worldline {
            id: row.get::<_, String>(0)?.into(),
            thread_id: row.get::<_, String>(1)?.into(),
            parent_worldline_id: row.get::<_, Option<String>>(2)?.map(Into::into),
            forked_from_event_id: row.get::<_, Option<String>>(3)?.map(Into::into),
            head_event_id: row.get::<_, Option<String>>(4)?.map(Into::into),
            name: row.get(5)?,
            needs_state_restore: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::sqlite::run_migrations;
    use loom_core::{ThreadId, WorldlineId};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO threads (id, title, created_at) VALUES ('thr_1', 't', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn
    }

    fn main_line() -> Worldline {
        Worldline {
            id: WorldlineId::from("wl_1"),
            thread_id: ThreadId::from("thr_1"),
            parent_worldline_id: None,
            forked_from_event_id: None,
            head_event_id: None,
            name: "main".into(),
            needs_state_restore: false,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn add_event(conn: &Connection, id: &str, seq: i64) {
        conn.execute(
            "INSERT INTO events (id, worldline_id, sequence, type, payload, created_at)
             VALUES (?1, 'wl_1', ?2, 'user_message', '{}', '2026-01-01T00:00:00Z')",
            params![id, seq],
        )
        .unwrap();
    }

    #[test]
    fn insert_and_get() {
        let conn = setup();
        WorldlineRepo::insert(&conn, &main_line()).unwrap();
        let got = WorldlineRepo::get(&conn, "wl_1").unwrap().unwrap();
        assert_eq!(got, main_line());
        assert!(WorldlineRepo::get(&conn, "wl_x").unwrap().is_none());
    }

    #[test]
    fn head_lookup() {
        let conn = setup();
        WorldlineRepo::insert(&conn, &main_line()).unwrap();
        assert_eq!(WorldlineRepo::get_head(&conn, "wl_1").unwrap(), Some(None));
        assert_eq!(WorldlineRepo::get_head(&conn, "wl_x").unwrap(), None);
    }

    #[test]
    fn advance_head_compares_null_and_values() {
        let conn = setup();
        WorldlineRepo::insert(&conn, &main_line()).unwrap();
        add_event(&conn, "e1", 1);
        add_event(&conn, "e2", 2);

        assert!(WorldlineRepo::advance_head(&conn, "wl_1", None, "e1").unwrap());
        assert!(!WorldlineRepo::advance_head(&conn, "wl_1", None, "e2").unwrap());
        assert!(WorldlineRepo::advance_head(&conn, "wl_1", Some("e1"), "e2").unwrap());
        assert_eq!(
            WorldlineRepo::get_head(&conn, "wl_1").unwrap(),
            Some(Some("e2".to_string()))
        );
    }

    #[test]
    fn list_by_thread_in_creation_order() {
        let conn = setup();
        WorldlineRepo::insert(&conn, &main_line()).unwrap();
        let mut branch = main_line();
        branch.id = WorldlineId::from("wl_2");
        branch.created_at = "2026-01-02T00:00:00Z".into();
        branch.parent_worldline_id = Some(WorldlineId::from("wl_1"));
        branch.needs_state_restore = true;
        WorldlineRepo::insert(&conn, &branch).unwrap();

        let all = WorldlineRepo::list_by_thread(&conn, "thr_1").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id.as_str(), "wl_2");
        assert!(all[1].needs_state_restore);

        assert!(WorldlineRepo::mark_state_restored(&conn, "wl_2").unwrap());
        assert!(!WorldlineRepo::get(&conn, "wl_2").unwrap().unwrap().needs_state_restore);
    }
}
