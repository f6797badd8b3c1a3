//! Thread repository.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::types::Thread;

/// Thread repository. Stateless, every method takes `&Connection`.
pub struct ThreadRepo;

impl ThreadRepo {
    /// Insert a thread row.
    pub fn insert(conn: &Connection, thread: &Thread) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO threads (id, title, created_at) VALUES (?1, ?2, ?3)",
            params![thread.id.as_str(), thread.title, thread.created_at],
        )?;
        Ok(())
    }

    /// Get a thread by ID.
    pub fn get(conn: &Connection, thread_id: &str) -> Result<Option<Thread>> {
        let row = conn
            .query_row(
                "SELECT id, title, created_at FROM threads WHERE id = ?1",
                params![thread_id],
                |row| {
                    Ok(Thread {
                        id: row.get::<_, String>(0)?.into(),
                        title: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::run_migrations;
    use loom_core::ThreadId;

    #[test]
    fn insert_and_get() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();
        let thread = Thread {
            id: ThreadId::from("thr_1"),
            title: "Quarterly revenue".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        };
        ThreadRepo::insert(&conn, &thread).unwrap();
        assert_eq!(ThreadRepo::get(&conn, "thr_1").unwrap(), Some(thread));
        assert!(ThreadRepo::get(&conn, "thr_2").unwrap().is_none());
    }
}
