//! Interactive turns streamed as server-sent events.
//!
//! The turn runs on its own task. Dropping the response stops frame delivery
//! but the turn carries on and its events are still persisted.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use loom_core::WorldlineId;
use loom_runtime::{TurnOutcome, TurnRequest};
use loom_stream::Frame;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::{ApiJson, required};
use crate::errors::{ApiError, ApiResult, WORLDLINE_BUSY};
use crate::server::AppState;

/// Body of `POST /worldlines/{id}/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// User message.
    pub message: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Iteration cap; the runtime default when absent.
    pub max_iterations: Option<u32>,
    /// Bypass the duplicate-call guards for this turn.
    #[serde(default)]
    pub allow_rerun: bool,
    /// Wait for a busy worldline instead of answering 409.
    #[serde(default = "default_wait")]
    pub wait: bool,
}

fn default_wait() -> bool {
    true
}

/// POST /worldlines/{id}/chat
pub async fn chat(
    State(state): State<AppState>,
    Path(worldline_id): Path<String>,
    ApiJson(body): ApiJson<ChatRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let worldline_id = WorldlineId::from(worldline_id);
    let message = required("message", &body.message)?.to_string();
    let provider = required("provider", &body.provider)?.to_string();
    let model = required("model", &body.model)?.to_string();
    if body.max_iterations == Some(0) {
        return Err(ApiError::bad_request("max_iterations must be positive"));
    }
    let _ = state.store.get_worldline(&worldline_id)?;

    let (tx, rx) = mpsc::channel(state.config.stream_buffer);
    let request = TurnRequest {
        max_iterations: body.max_iterations,
        allow_rerun: body.allow_rerun,
        sink: Some(tx),
        ..TurnRequest::new(worldline_id.clone(), message, provider, model)
    };

    let runner = state.runner.clone();
    let turn: BoxFuture<'static, loom_runtime::Result<TurnOutcome>> = if body.wait {
        runner.run_turn(request)
    } else {
        let guard = runner.locks().try_acquire(&worldline_id).ok_or_else(|| ApiError::Conflict {
            code: WORLDLINE_BUSY,
            message: format!("worldline {worldline_id} has a turn in flight"),
        })?;
        Box::pin(async move { runner.run_locked(request, guard).await })
    };

    metrics::counter!("chat_streams_total").increment(1);
    drop(tokio::spawn(async move {
        match turn.await {
            Ok(outcome) => info!(
                worldline_id = %outcome.worldline_id,
                turn_id = %outcome.turn_id,
                state = %outcome.final_state,
                "interactive turn finished"
            ),
            Err(e) => warn!(error = %e, "interactive turn could not start"),
        }
    }));

    let frames = ReceiverStream::new(rx).map(|frame| Ok(sse_event(&frame)));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

fn sse_event(frame: &Frame) -> SseEvent {
    match frame.data() {
        Ok(data) => SseEvent::default().event(frame.kind().as_str()).data(data),
        Err(e) => {
            warn!(seq = frame.seq(), error = %e, "frame serialization failed");
            let body = json!({ "seq": frame.seq(), "error": e.to_string() });
            SseEvent::default().event("error").data(body.to_string())
        }
    }
}
