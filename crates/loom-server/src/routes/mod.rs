//! HTTP routes.

pub mod chat;
pub mod jobs;
pub mod threads;
pub mod worldlines;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request, State};
use axum::http::request::Parts;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;

use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::metrics::metrics_handler;
use crate::server::AppState;

/// Router over every endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/threads", post(threads::create_thread))
        .route("/threads/{id}/worldlines", post(threads::create_worldline))
        .route("/threads/{id}/worldline-summaries", get(threads::summaries))
        .route("/worldlines/{id}/branch", post(worldlines::branch))
        .route("/worldlines/{id}/events", get(worldlines::events).post(worldlines::append))
        .route("/worldlines/{id}/chat", post(chat::chat))
        .route("/chat/jobs", post(jobs::queue).get(jobs::list))
        .route("/chat/jobs/{id}", get(jobs::get))
        .route("/chat/jobs/{id}/ack", post(jobs::ack))
        .route("/chat/jobs/{id}/cancel", post(jobs::cancel))
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.runner.locks().busy_count(),
        state.config.worker_count,
    ))
}

// ── Extractors ──────────────────────────────────────────────────────

/// JSON body whose rejection is an [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(&rejection)),
        }
    }
}

/// Query string whose rejection is an [`ApiError`].
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(query_rejection(&rejection)),
        }
    }
}

fn json_rejection(rejection: &JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

fn query_rejection(rejection: &QueryRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}

/// Trimmed value of a required text field.
pub(crate) fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}
