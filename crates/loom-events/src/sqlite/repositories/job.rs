//! Chat job repository.
//!
//! Every status change is a conditional update on the current status, so a
//! job enters each non-queued status at most once even when the scheduler
//! and an API call race.

use std::fmt::Write;

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::errors::Result;
use crate::sqlite::row_types::JobRow;
use crate::types::{ChatJob, JobStatus};

const JOB_SELECT: &str = "SELECT j.id, j.thread_id, j.worldline_id, j.status, j.message, j.provider,
        j.model, j.max_iterations, j.created_at, j.started_at, j.finished_at,
        j.result_summary, j.error, j.seen_at,
        CASE WHEN j.status = 'queued' THEN
            (SELECT COUNT(*) FROM chat_jobs q
             WHERE q.thread_id = j.thread_id AND q.status = 'queued' AND q.seq <= j.seq)
        END AS queue_position
 FROM chat_jobs j";

/// Filters for [`JobRepo::list`]. Empty filters match everything.
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    /// Only jobs of this thread.
    pub thread_id: Option<String>,
    /// Only jobs of this worldline.
    pub worldline_id: Option<String>,
    /// Only jobs in one of these statuses.
    pub statuses: Vec<JobStatus>,
    /// Maximum rows (newest first).
    pub limit: Option<i64>,
}

/// Per-status job counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Queued jobs.
    pub queued: i64,
    /// Running jobs.
    pub running: i64,
    /// Completed jobs.
    pub completed: i64,
    /// Failed jobs.
    pub failed: i64,
    /// Cancelled jobs.
    pub cancelled: i64,
}

/// Chat job repository. Stateless, every method takes `&Connection`.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job row.
    pub fn insert(conn: &Connection, job: &ChatJob) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO chat_jobs (id, thread_id, worldline_id, status, message, provider, model,
                                    max_iterations, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id.as_str(),
                job.thread_id.as_str(),
                job.worldline_id.as_str(),
                job.status.as_str(),
                job.message,
                job.provider,
                job.model,
                job.max_iterations,
                job.created_at,
            ],
        )?;
        Ok(())
    }

    /// Get a job by ID.
    pub fn get(conn: &Connection, job_id: &str) -> Result<Option<ChatJob>> {
        let row = conn
            .query_row(
                &format!("{JOB_SELECT} WHERE j.id = ?1"),
                params![job_id],
                Self::map_row,
            )
            .optional()?;
        row.map(ChatJob::try_from).transpose()
    }

    /// List jobs matching `filter`, newest first.
    pub fn list(conn: &Connection, filter: &JobFilter) -> Result<Vec<ChatJob>> {
        let mut sql = format!("{JOB_SELECT} WHERE 1 = 1");
        let mut values: Vec<String> = Vec::new();

        if let Some(thread_id) = &filter.thread_id {
            values.push(thread_id.clone());
            let _ = write!(sql, " AND j.thread_id = ?{}", values.len());
        }
        if let Some(worldline_id) = &filter.worldline_id {
            values.push(worldline_id.clone());
            let _ = write!(sql, " AND j.worldline_id = ?{}", values.len());
        }
        if !filter.statuses.is_empty() {
            let mut placeholders = Vec::with_capacity(filter.statuses.len());
            for status in &filter.statuses {
                values.push(status.as_str().to_string());
                placeholders.push(format!("?{}", values.len()));
            }
            let _ = write!(sql, " AND j.status IN ({})", placeholders.join(", "));
        }
        sql.push_str(" ORDER BY j.seq DESC");
        if let Some(limit) = filter.limit {
            let _ = write!(sql, " LIMIT {}", limit.max(0));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(ChatJob::try_from).collect()
    }

    /// Queued jobs in enqueue order.
    pub fn list_queued(conn: &Connection, limit: i64) -> Result<Vec<ChatJob>> {
        let mut stmt = conn.prepare(&format!(
            "{JOB_SELECT} WHERE j.status = 'queued' ORDER BY j.seq ASC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(ChatJob::try_from).collect()
    }

    /// `queued → running`. Returns whether the job was claimed.
    pub fn mark_running(conn: &Connection, job_id: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chat_jobs SET status = 'running', started_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![job_id, now],
        )?;
        Ok(changed == 1)
    }

    /// `running → completed`.
    pub fn mark_completed(
        conn: &Connection,
        job_id: &str,
        summary: &str,
        now: &str,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chat_jobs SET status = 'completed', result_summary = ?2, finished_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![job_id, summary, now],
        )?;
        Ok(changed == 1)
    }

    /// `running → failed`.
    pub fn mark_failed(conn: &Connection, job_id: &str, error: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chat_jobs SET status = 'failed', error = ?2, finished_at = ?3
             WHERE id = ?1 AND status = 'running'",
            params![job_id, error, now],
        )?;
        Ok(changed == 1)
    }

    /// Every `running` job to `failed`. Returns the number of jobs moved.
    pub fn fail_running(conn: &Connection, error: &str, now: &str) -> Result<usize> {
        let changed = conn.execute(
            "UPDATE chat_jobs SET status = 'failed', error = ?1, finished_at = ?2
             WHERE status = 'running'",
            params![error, now],
        )?;
        Ok(changed)
    }

    /// `queued → cancelled`.
    pub fn mark_cancelled(conn: &Connection, job_id: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE chat_jobs SET status = 'cancelled', finished_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![job_id, now],
        )?;
        Ok(changed == 1)
    }

    /// Set `seen_at` unless already set (`seen = true`), or clear it.
    pub fn set_seen(conn: &Connection, job_id: &str, seen: bool, now: &str) -> Result<bool> {
        let changed = if seen {
            conn.execute(
                "UPDATE chat_jobs SET seen_at = COALESCE(seen_at, ?2) WHERE id = ?1",
                params![job_id, now],
            )?
        } else {
            conn.execute(
                "UPDATE chat_jobs SET seen_at = NULL WHERE id = ?1",
                params![job_id],
            )?
        };
        Ok(changed == 1)
    }

    /// Per-status counts for a worldline.
    pub fn status_counts(conn: &Connection, worldline_id: &str) -> Result<StatusCounts> {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM chat_jobs WHERE worldline_id = ?1 GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![worldline_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match status.as_str() {
                "queued" => counts.queued = n,
                "running" => counts.running = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                "cancelled" => counts.cancelled = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Status and latest timestamp of the newest job on a worldline.
    pub fn latest_for_worldline(
        conn: &Connection,
        worldline_id: &str,
    ) -> Result<Option<(JobStatus, String)>> {
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT status, COALESCE(finished_at, started_at, created_at)
                 FROM chat_jobs WHERE worldline_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![worldline_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(status, ts)| {
            status
                .parse::<JobStatus>()
                .map(|s| (s, ts))
                .map_err(crate::errors::EventStoreError::InvalidOperation)
        })
        .transpose()
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
        Ok(JobRow {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            worldline_id: row.get(2)?,
            status: row.get(3)?,
            message: row.get(4)?,
            provider: row.get(5)?,
            model: row.get(6)?,
            max_iterations: row.get(7)?,
            created_at: row.get(8)?,
            started_at: row.get(9)?,
            finished_at: row.get(10)?,
            result_summary: row.get(11)?,
            error: row.get(12)?,
            seen_at: row.get(13)?,
            queue_position: row.get(14)?,
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
    use loom_core::{JobId, ThreadId, WorldlineId};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO threads (id, title, created_at) VALUES ('thr_1', 't', 'x'), ('thr_2', 't', 'x');
             INSERT INTO worldlines (id, thread_id, name, created_at)
               VALUES ('wl_1', 'thr_1', 'm', 'x'), ('wl_2', 'thr_1', 'b', 'x'), ('wl_3', 'thr_2', 'm', 'x');",
        )
        .unwrap();
        conn
    }

    fn job(id: &str, thread: &str, worldline: &str) -> ChatJob {
        ChatJob {
            id: JobId::from(id),
            thread_id: ThreadId::from(thread),
            worldline_id: WorldlineId::from(worldline),
            status: JobStatus::Queued,
            message: "summarize".into(),
            provider: "scripted".into(),
            model: "m".into(),
            max_iterations: 6,
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            finished_at: None,
            result_summary: None,
            error: None,
            seen_at: None,
            queue_position: None,
        }
    }

    #[test]
    fn queue_position_is_thread_scoped() {
        let conn = setup();
        JobRepo::insert(&conn, &job("j1", "thr_1", "wl_1")).unwrap();
        JobRepo::insert(&conn, &job("j2", "thr_2", "wl_3")).unwrap();
        JobRepo::insert(&conn, &job("j3", "thr_1", "wl_2")).unwrap();

        assert_eq!(JobRepo::get(&conn, "j1").unwrap().unwrap().queue_position, Some(1));
        assert_eq!(JobRepo::get(&conn, "j2").unwrap().unwrap().queue_position, Some(1));
        assert_eq!(JobRepo::get(&conn, "j3").unwrap().unwrap().queue_position, Some(2));

        assert!(JobRepo::mark_running(&conn, "j1", "t").unwrap());
        assert_eq!(JobRepo::get(&conn, "j1").unwrap().unwrap().queue_position, None);
        assert_eq!(JobRepo::get(&conn, "j3").unwrap().unwrap().queue_position, Some(1));
    }

    #[test]
    fn status_transitions_are_conditional() {
        let conn = setup();
        JobRepo::insert(&conn, &job("j1", "thr_1", "wl_1")).unwrap();

        assert!(!JobRepo::mark_completed(&conn, "j1", "done", "t").unwrap());
        assert!(JobRepo::mark_running(&conn, "j1", "t1").unwrap());
        assert!(!JobRepo::mark_running(&conn, "j1", "t2").unwrap());
        assert!(!JobRepo::mark_cancelled(&conn, "j1", "t").unwrap());
        assert!(JobRepo::mark_completed(&conn, "j1", "done", "t3").unwrap());
        assert!(!JobRepo::mark_failed(&conn, "j1", "boom", "t4").unwrap());

        let stored = JobRepo::get(&conn, "j1").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.started_at.as_deref(), Some("t1"));
        assert_eq!(stored.finished_at.as_deref(), Some("t3"));
        assert_eq!(stored.result_summary.as_deref(), Some("done"));
        assert!(stored.error.is_none());
    }

    #[test]
    fn seen_keeps_first_time() {
        let conn = setup();
        JobRepo::insert(&conn, &job("j1", "thr_1", "wl_1")).unwrap();
        JobRepo::set_seen(&conn, "j1", true, "first").unwrap();
        JobRepo::set_seen(&conn, "j1", true, "second").unwrap();
        assert_eq!(
            JobRepo::get(&conn, "j1").unwrap().unwrap().seen_at.as_deref(),
            Some("first")
        );
        JobRepo::set_seen(&conn, "j1", false, "third").unwrap();
        assert!(JobRepo::get(&conn, "j1").unwrap().unwrap().seen_at.is_none());
        assert!(!JobRepo::set_seen(&conn, "missing", true, "x").unwrap());
    }

    #[test]
    fn list_filters_combine() {
        let conn = setup();
        JobRepo::insert(&conn, &job("j1", "thr_1", "wl_1")).unwrap();
        JobRepo::insert(&conn, &job("j2", "thr_1", "wl_2")).unwrap();
        JobRepo::insert(&conn, &job("j3", "thr_2", "wl_3")).unwrap();
        JobRepo::mark_running(&conn, "j2", "t").unwrap();

        let all = JobRepo::list(&conn, &JobFilter::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["j3", "j2", "j1"]);

        let thread = JobRepo::list(
            &conn,
            &JobFilter {
                thread_id: Some("thr_1".into()),
                statuses: vec![JobStatus::Queued],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].id.as_str(), "j1");

        let by_worldline = JobRepo::list(
            &conn,
            &JobFilter {
                worldline_id: Some("wl_2".into()),
                statuses: vec![JobStatus::Running, JobStatus::Completed],
                limit: Some(5),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_worldline.len(), 1);

        let limited = JobRepo::list(
            &conn,
            &JobFilter {
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn counts_and_latest() {
        let conn = setup();
        JobRepo::insert(&conn, &job("j1", "thr_1", "wl_1")).unwrap();
        JobRepo::insert(&conn, &job("j2", "thr_1", "wl_1")).unwrap();
        JobRepo::mark_cancelled(&conn, "j2", "t9").unwrap();

        let counts = JobRepo::status_counts(&conn, "wl_1").unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.running, 0);

        let (status, ts) = JobRepo::latest_for_worldline(&conn, "wl_1").unwrap().unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(ts, "t9");
        assert!(JobRepo::latest_for_worldline(&conn, "wl_2").unwrap().is_none());

        let queued = JobRepo::list_queued(&conn, 10).unwrap();
        assert_eq!(queued.len(), 1);
    }
}
