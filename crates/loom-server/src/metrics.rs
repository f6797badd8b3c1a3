//! Prometheus metrics recorder and `/metrics` endpoint handler.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ApiError;
use crate::server::AppState;

/// Prometheus text exposition content type.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => ([(CONTENT_TYPE, TEXT_FORMAT)], handle.render()).into_response(),
        None => ApiError::NotFound("metrics recorder not installed".into()).into_response(),
    }
}

// Metric names recorded across the workspace.

/// Turns finished (counter, labels: state).
pub const TURNS_TOTAL: &str = "turns_total";
/// Turn wall time in seconds (histogram).
pub const TURN_DURATION_SECONDS: &str = "turn_duration_seconds";
/// Tool calls executed (counter, labels: tool).
pub const TOOL_CALLS_TOTAL: &str = "tool_calls_total";
/// Tool calls recorded as skipped (counter, labels: reason).
pub const TOOL_CALLS_SKIPPED_TOTAL: &str = "tool_calls_skipped_total";
/// Appends retried after a stale head (counter).
pub const STALE_HEAD_RETRIES_TOTAL: &str = "stale_head_retries_total";
/// Deltas dropped for a full client buffer (counter).
pub const STREAM_DELTAS_DROPPED_TOTAL: &str = "stream_deltas_dropped_total";
/// Interactive chat streams opened (counter).
pub const CHAT_STREAMS_TOTAL: &str = "chat_streams_total";
/// Jobs queued (counter).
pub const JOBS_QUEUED_TOTAL: &str = "jobs_queued_total";
/// Jobs reaching a terminal status through a worker or startup recovery
/// (counter, labels: status).
pub const JOBS_FINISHED_TOTAL: &str = "jobs_finished_total";
/// Jobs currently executing (gauge).
pub const JOBS_RUNNING: &str = "jobs_running";
/// Subagent children joined (counter, labels: status).
pub const SUBAGENT_CHILDREN_TOTAL: &str = "subagent_children_total";
