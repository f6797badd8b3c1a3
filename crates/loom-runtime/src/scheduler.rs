//! Background job scheduler.
//!
//! A fixed pool of workers pulls queued jobs in enqueue order. A job is only
//! claimed once its worldline lock is held, so a job whose worldline is busy
//! (another job, an interactive stream, or a subagent) stays queued and later
//! jobs on other worldlines go ahead. Workers wake on new jobs, on released
//! worldlines, and on a poll interval.

use std::sync::Arc;
use std::time::Duration;

use loom_core::JobId;
use loom_events::{ChatJob, JobFilter, JobStore, NewJob};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::{ReasonCode, Result};
use crate::locks::WorldlineGuard;
use crate::turn::{TurnRequest, TurnRunner};

/// Queued jobs examined per claim attempt.
const CLAIM_SCAN_LIMIT: i64 = 64;

struct Shared {
    jobs: JobStore,
    runner: TurnRunner,
    poll_interval: Duration,
    summary_chars: usize,
    wake: Notify,
    cancel: CancellationToken,
}

/// Runs queued chat jobs on a worker pool.
pub struct JobScheduler {
    shared: Arc<Shared>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Scheduler over `jobs`, running turns with `runner`. Call
    /// [`start`](Self::start) to spawn the workers.
    #[must_use]
    pub fn new(
        jobs: JobStore,
        runner: TurnRunner,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Self {
        let summary_chars = runner.config().preview_chars;
        Self {
            shared: Arc::new(Shared {
                jobs,
                runner,
                poll_interval,
                summary_chars,
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            worker_count: worker_count.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers. A second call is a no-op.
    ///
    /// Jobs still marked `running` belong to a process that stopped mid-turn
    /// and are failed with `interrupted` before the first worker starts.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Ok(());
        }
        let interrupted = self.shared.jobs.fail_interrupted(&format!(
            "{}: process stopped while the job was running",
            ReasonCode::Interrupted
        ))?;
        metrics::counter!("jobs_finished_total", "status" => "failed").increment(interrupted as u64);
        for worker in 0..self.worker_count {
            workers.push(tokio::spawn(worker_loop(self.shared.clone(), worker)));
        }
        info!(workers = self.worker_count, "job scheduler started");
        Ok(())
    }

    /// Enqueue a job and wake a worker.
    pub fn queue(&self, request: &NewJob) -> Result<ChatJob> {
        let job = self.shared.jobs.enqueue(request)?;
        metrics::counter!("jobs_queued_total").increment(1);
        self.shared.wake.notify_one();
        Ok(job)
    }

    /// Fetch one job.
    pub fn get(&self, job_id: &JobId) -> Result<ChatJob> {
        Ok(self.shared.jobs.get(job_id)?)
    }

    /// List jobs matching `filter`.
    pub fn list(&self, filter: &JobFilter) -> Result<Vec<ChatJob>> {
        Ok(self.shared.jobs.list(filter)?)
    }

    /// Acknowledge (or clear the acknowledgment of) a finished job.
    pub fn ack(&self, job_id: &JobId, seen: bool) -> Result<ChatJob> {
        Ok(self.shared.jobs.ack(job_id, seen)?)
    }

    /// Cancel a queued job. Running and finished jobs come back unchanged.
    pub fn cancel(&self, job_id: &JobId) -> Result<ChatJob> {
        Ok(self.shared.jobs.cancel(job_id)?)
    }

    /// Job store backing the scheduler.
    #[must_use]
    pub fn jobs(&self) -> &JobStore {
        &self.shared.jobs
    }

    /// Stop the workers once their current job finishes.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let count = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "job worker ended abnormally");
            }
        }
        info!(workers = count, "job scheduler stopped");
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    let released = shared.runner.locks().released();
    debug!(worker, "job worker started");
    while !shared.cancel.is_cancelled() {
        match next_job(&shared) {
            Ok(Some((job, guard))) => run_job(&shared, job, guard).await,
            Ok(None) => {
                tokio::select! {
                    () = shared.cancel.cancelled() => break,
                    () = shared.wake.notified() => {}
                    () = released.notified() => {}
                    () = tokio::time::sleep(shared.poll_interval) => {}
                }
            }
            Err(e) => {
                error!(worker, error = %e, "job claim failed");
                tokio::select! {
                    () = shared.cancel.cancelled() => break,
                    () = tokio::time::sleep(shared.poll_interval) => {}
                }
            }
        }
    }
    debug!(worker, "job worker stopped");
}

/// Oldest queued job whose worldline is free, claimed and locked.
fn next_job(shared: &Shared) -> Result<Option<(ChatJob, WorldlineGuard)>> {
    for job in shared.jobs.queued(CLAIM_SCAN_LIMIT)? {
        let Some(guard) = shared.runner.locks().try_acquire(&job.worldline_id) else {
            continue;
        };
        if let Some(claimed) = shared.jobs.claim(&job.id)? {
            return Ok(Some((claimed, guard)));
        }
    }
    Ok(None)
}

#[instrument(skip_all, fields(job_id = %job.id, worldline_id = %job.worldline_id))]
async fn run_job(shared: &Shared, job: ChatJob, guard: WorldlineGuard) {
    info!("job running");
    metrics::gauge!("jobs_running").increment(1.0);
    let request = TurnRequest {
        max_iterations: Some(job.max_iterations),
        job_id: Some(job.id.clone()),
        ..TurnRequest::new(
            job.worldline_id.clone(),
            job.message.clone(),
            job.provider.clone(),
            job.model.clone(),
        )
    };

    // A panicking turn must not take the worker down with it.
    let runner = shared.runner.clone();
    let joined = tokio::spawn(async move { runner.run_locked(request, guard).await }).await;

    metrics::gauge!("jobs_running").decrement(1.0);

    let (status, recorded) = match joined {
        Ok(Ok(outcome)) if outcome.is_completed() => {
            info!(iterations = outcome.iterations, "job completed");
            ("completed", shared.jobs.complete(&job.id, &outcome.summary(shared.summary_chars)))
        }
        Ok(Ok(outcome)) => {
            warn!(reason = ?outcome.reason, "job failed");
            ("failed", shared.jobs.fail(&job.id, &outcome.summary(shared.summary_chars)))
        }
        Ok(Err(e)) => {
            warn!(error = %e, "job failed before its turn started");
            ("failed", shared.jobs.fail(&job.id, &format!("{}: {e}", e.reason_code())))
        }
        Err(e) => {
            error!(error = %e, "job task aborted");
            let error = format!("{}: job task aborted: {e}", ReasonCode::InternalError);
            ("failed", shared.jobs.fail(&job.id, &error))
        }
    };
    if matches!(recorded, Ok(true)) {
        metrics::counter!("jobs_finished_total", "status" => status).increment(1);
    }

    match recorded {
        Ok(true) => {}
        Ok(false) => warn!("job was no longer running when its result arrived"),
        Err(e) => error!(error = %e, "could not record job result"),
    }
}
