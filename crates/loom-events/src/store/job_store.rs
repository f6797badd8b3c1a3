//! Persistence for background chat jobs.

use loom_core::{JobId, WorldlineId, now_rfc3339};
use tracing::{debug, info, warn};

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{ConnectionPool, PooledConnection};
use crate::sqlite::repositories::job::{JobFilter, StatusCounts};
use crate::sqlite::repositories::{JobRepo, WorldlineRepo};
use crate::types::{ChatJob, JobStatus};

/// Request to enqueue a job.
#[derive(Clone, Debug)]
pub struct NewJob {
    /// Target worldline.
    pub worldline_id: WorldlineId,
    /// User message for the turn.
    pub message: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Iteration cap.
    pub max_iterations: u32,
}

/// Job store sharing the event store's pool.
#[derive(Clone, Debug)]
pub struct JobStore {
    pool: ConnectionPool,
}

impl JobStore {
    /// Wrap a pool whose migrations have run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Insert a `queued` job for `request.worldline_id`.
    pub fn enqueue(&self, request: &NewJob) -> Result<ChatJob> {
        let conn = self.conn()?;
        let worldline = WorldlineRepo::get(&conn, &request.worldline_id)?
            .ok_or_else(|| EventStoreError::WorldlineNotFound(request.worldline_id.to_string()))?;

        let job = ChatJob {
            id: JobId::new(),
            thread_id: worldline.thread_id,
            worldline_id: worldline.id,
            status: JobStatus::Queued,
            message: request.message.clone(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            max_iterations: request.max_iterations,
            created_at: now_rfc3339(),
            started_at: None,
            finished_at: None,
            result_summary: None,
            error: None,
            seen_at: None,
            queue_position: None,
        };
        JobRepo::insert(&conn, &job)?;
        info!(job_id = %job.id, worldline_id = %job.worldline_id, "job queued");
        JobRepo::get(&conn, &job.id)?.ok_or_else(|| EventStoreError::JobNotFound(job.id.to_string()))
    }

    /// Get a job.
    pub fn get(&self, job_id: &JobId) -> Result<ChatJob> {
        JobRepo::get(&*self.conn()?, job_id)?
            .ok_or_else(|| EventStoreError::JobNotFound(job_id.to_string()))
    }

    /// List jobs, newest first.
    pub fn list(&self, filter: &JobFilter) -> Result<Vec<ChatJob>> {
        JobRepo::list(&*self.conn()?, filter)
    }

    /// Queued jobs in enqueue order.
    pub fn queued(&self, limit: i64) -> Result<Vec<ChatJob>> {
        JobRepo::list_queued(&*self.conn()?, limit)
    }

    /// Move a queued job to `running`. `None` if it is no longer queued.
    pub fn claim(&self, job_id: &JobId) -> Result<Option<ChatJob>> {
        let conn = self.conn()?;
        if !JobRepo::mark_running(&conn, job_id, &now_rfc3339())? {
            return Ok(None);
        }
        debug!(job_id = %job_id, "job claimed");
        JobRepo::get(&conn, job_id)
    }

    /// Record a completed run.
    pub fn complete(&self, job_id: &JobId, summary: &str) -> Result<bool> {
        JobRepo::mark_completed(&*self.conn()?, job_id, summary, &now_rfc3339())
    }

    /// Record a failed run.
    pub fn fail(&self, job_id: &JobId, error: &str) -> Result<bool> {
        JobRepo::mark_failed(&*self.conn()?, job_id, error, &now_rfc3339())
    }

    /// Fail every job left `running` by a previous process. Call before any
    /// worker starts.
    pub fn fail_interrupted(&self, error: &str) -> Result<usize> {
        let failed = JobRepo::fail_running(&*self.conn()?, error, &now_rfc3339())?;
        if failed > 0 {
            warn!(failed, "interrupted jobs marked failed");
        }
        Ok(failed)
    }

    /// Cancel a queued job. Jobs in any other status are returned unchanged.
    pub fn cancel(&self, job_id: &JobId) -> Result<ChatJob> {
        let conn = self.conn()?;
        if JobRepo::mark_cancelled(&conn, job_id, &now_rfc3339())? {
            info!(job_id = %job_id, "job cancelled");
        }
        JobRepo::get(&conn, job_id)?.ok_or_else(|| EventStoreError::JobNotFound(job_id.to_string()))
    }

    /// Acknowledge (or un-acknowledge) a job. Idempotent: the first
    /// acknowledgment time is kept.
    pub fn ack(&self, job_id: &JobId, seen: bool) -> Result<ChatJob> {
        let conn = self.conn()?;
        if !JobRepo::set_seen(&conn, job_id, seen, &now_rfc3339())? {
            return Err(EventStoreError::JobNotFound(job_id.to_string()));
        }
        JobRepo::get(&conn, job_id)?.ok_or_else(|| EventStoreError::JobNotFound(job_id.to_string()))
    }

    /// Per-status counts for a worldline.
    pub fn status_counts(&self, worldline_id: &WorldlineId) -> Result<StatusCounts> {
        JobRepo::status_counts(&*self.conn()?, worldline_id)
    }

    /// Newest job status and its latest timestamp on a worldline.
    pub fn latest(&self, worldline_id: &WorldlineId) -> Result<Option<(JobStatus, String)>> {
        JobRepo::latest_for_worldline(&*self.conn()?, worldline_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
