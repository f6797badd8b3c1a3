//! Background chat jobs.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use loom_core::{JobId, WorldlineId};
use loom_events::{ChatJob, JobFilter, JobStatus, NewJob};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, ApiQuery, required};
use crate::errors::{ApiError, ApiResult};
use crate::server::AppState;

/// Body of `POST /chat/jobs`.
#[derive(Debug, Deserialize)]
pub struct QueueJob {
    /// Target worldline.
    pub worldline_id: String,
    /// User message.
    pub message: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Iteration cap; the runtime default when absent.
    pub max_iterations: Option<u32>,
}

/// Query of `GET /chat/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListJobs {
    /// Only jobs of this thread.
    pub thread_id: Option<String>,
    /// Only jobs of this worldline.
    pub worldline_id: Option<String>,
    /// Comma-separated statuses.
    pub status: Option<String>,
    /// Maximum jobs returned.
    pub limit: Option<i64>,
}

/// Body of `POST /chat/jobs/{id}/ack`.
#[derive(Debug, Deserialize)]
pub struct AckJob {
    /// `false` clears an earlier acknowledgment.
    #[serde(default = "default_seen")]
    pub seen: bool,
}

fn default_seen() -> bool {
    true
}

/// POST /chat/jobs
pub async fn queue(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<QueueJob>,
) -> ApiResult<(StatusCode, Json<ChatJob>)> {
    let max_iterations = body
        .max_iterations
        .unwrap_or(state.runner.config().max_iterations);
    if max_iterations == 0 {
        return Err(ApiError::bad_request("max_iterations must be positive"));
    }
    let request = NewJob {
        worldline_id: WorldlineId::from(required("worldline_id", &body.worldline_id)?),
        message: required("message", &body.message)?.to_string(),
        provider: required("provider", &body.provider)?.to_string(),
        model: required("model", &body.model)?.to_string(),
        max_iterations,
    };
    let job = state.scheduler.queue(&request)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /chat/jobs
pub async fn list(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListJobs>,
) -> ApiResult<Json<Value>> {
    let statuses = match query.status.as_deref() {
        Some(raw) => parse_statuses(raw)?,
        None => Vec::new(),
    };
    if query.limit.is_some_and(|l| l <= 0) {
        return Err(ApiError::bad_request("limit must be positive"));
    }
    let filter = JobFilter {
        thread_id: query.thread_id,
        worldline_id: query.worldline_id,
        statuses,
        limit: query.limit,
    };
    let jobs = state.scheduler.list(&filter)?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// GET /chat/jobs/{id}
pub async fn get(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<ChatJob>> {
    Ok(Json(state.scheduler.get(&JobId::from(job_id))?))
}

/// POST /chat/jobs/{id}/ack
pub async fn ack(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    ApiJson(body): ApiJson<AckJob>,
) -> ApiResult<Json<ChatJob>> {
    Ok(Json(state.scheduler.ack(&JobId::from(job_id), body.seen)?))
}

/// POST /chat/jobs/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ChatJob>> {
    Ok(Json(state.scheduler.cancel(&JobId::from(job_id))?))
}

fn parse_statuses(raw: &str) -> ApiResult<Vec<JobStatus>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| JobStatus::from_str(s).map_err(ApiError::BadRequest))
        .collect()
}
