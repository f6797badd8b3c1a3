//! Branching, timeline paging, and engine mutations recorded from outside a
//! turn.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use loom_core::{EventId, WorldlineId};
use loom_events::{Event, EventType, TimelinePage};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ApiJson, ApiQuery, required};
use crate::errors::{ApiError, ApiResult, WORLDLINE_BUSY};
use crate::server::AppState;

/// Default page size for timeline reads.
const DEFAULT_PAGE: usize = 100;
/// Largest page a client may request.
const MAX_PAGE: usize = 1000;

/// Body of `POST /worldlines/{id}/branch`.
#[derive(Debug, Deserialize)]
pub struct BranchRequest {
    /// Event the branch starts at.
    pub from_event_id: String,
    /// Display name of the new worldline.
    pub name: String,
}

/// Query of `GET /worldlines/{id}/events`.
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Timeline events already read.
    pub cursor: Option<usize>,
    /// Page size.
    pub limit: Option<usize>,
}

/// Body of `POST /worldlines/{id}/events`.
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// `data_imported`, `source_attached`, or `source_detached`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload matching `type`.
    pub payload: Value,
    /// Head the caller last read. The current head when absent.
    pub expected_head_event_id: Option<String>,
}

/// POST /worldlines/{id}/branch
pub async fn branch(
    State(state): State<AppState>,
    Path(worldline_id): Path<String>,
    ApiJson(body): ApiJson<BranchRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let from_event_id = required("from_event_id", &body.from_event_id)?;
    let name = required("name", &body.name)?;
    let worldline = state.runner.manager().branch(
        &WorldlineId::from(worldline_id),
        &EventId::from(from_event_id),
        name,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "new_worldline_id": worldline.id, "worldline": worldline })),
    ))
}

/// GET /worldlines/{id}/events
pub async fn events(
    State(state): State<AppState>,
    Path(worldline_id): Path<String>,
    ApiQuery(query): ApiQuery<EventsQuery>,
) -> ApiResult<Json<TimelinePage>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE);
    if limit == 0 || limit > MAX_PAGE {
        return Err(ApiError::bad_request(format!("limit must be between 1 and {MAX_PAGE}")));
    }
    let page = state.runner.manager().timeline_page(
        &WorldlineId::from(worldline_id),
        query.cursor.unwrap_or(0),
        limit,
    )?;
    Ok(Json(page))
}

/// POST /worldlines/{id}/events
///
/// Records an import or a source change made to the analytic engine outside
/// a turn, so branches forked after it restore it.
pub async fn append(
    State(state): State<AppState>,
    Path(worldline_id): Path<String>,
    ApiJson(body): ApiJson<AppendRequest>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let worldline_id = WorldlineId::from(worldline_id);
    let event_type =
        EventType::from_str(required("type", &body.event_type)?).map_err(ApiError::BadRequest)?;
    if !event_type.is_engine_mutation() {
        return Err(ApiError::bad_request(format!(
            "{event_type} events are only written by turns"
        )));
    }
    let _ = state.store.get_worldline(&worldline_id)?;

    let _guard = state.runner.locks().try_acquire(&worldline_id).ok_or_else(|| ApiError::Conflict {
        code: WORLDLINE_BUSY,
        message: format!("worldline {worldline_id} has a turn in flight"),
    })?;
    let expected = match body.expected_head_event_id {
        Some(id) => Some(EventId::from(id)),
        None => state.store.get_head(&worldline_id)?,
    };
    let event = state
        .store
        .append_value(&worldline_id, expected.as_ref(), event_type, body.payload)?;
    info!(worldline_id = %worldline_id, event_id = %event.id, %event_type, "engine mutation recorded");
    Ok((StatusCode::CREATED, Json(event)))
}
