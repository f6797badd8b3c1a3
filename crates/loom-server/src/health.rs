//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Worldlines with a turn in flight.
    pub busy_worldlines: usize,
    /// Background job workers.
    pub job_workers: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, busy_worldlines: usize, job_workers: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        busy_worldlines,
        job_workers,
    }
}
