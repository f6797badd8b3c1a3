//! Thread and worldline creation, plus per-thread summaries.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use loom_core::ThreadId;
use loom_events::{Thread, Worldline};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ApiJson, required};
use crate::errors::ApiResult;
use crate::server::AppState;

/// Body of `POST /threads`.
#[derive(Debug, Deserialize)]
pub struct CreateThread {
    /// Display title.
    #[serde(default)]
    pub title: String,
}

/// Body of `POST /threads/{id}/worldlines`.
#[derive(Debug, Deserialize)]
pub struct CreateWorldline {
    /// Display name.
    pub name: String,
}

/// POST /threads
pub async fn create_thread(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateThread>,
) -> ApiResult<(StatusCode, Json<Thread>)> {
    let thread = state.store.create_thread(body.title.trim())?;
    info!(thread_id = %thread.id, "thread created");
    Ok((StatusCode::CREATED, Json(thread)))
}

/// POST /threads/{id}/worldlines
pub async fn create_worldline(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    ApiJson(body): ApiJson<CreateWorldline>,
) -> ApiResult<(StatusCode, Json<Worldline>)> {
    let name = required("name", &body.name)?;
    let worldline = state
        .runner
        .manager()
        .create_worldline(&ThreadId::from(thread_id), name)?;
    Ok((StatusCode::CREATED, Json(worldline)))
}

/// GET /threads/{id}/worldline-summaries
pub async fn summaries(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let thread_id = ThreadId::from(thread_id);
    let summaries = state.runner.manager().summaries(&thread_id)?;
    Ok(Json(json!({ "thread_id": thread_id, "worldlines": summaries })))
}
