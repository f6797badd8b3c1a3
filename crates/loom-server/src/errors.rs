//! HTTP error type and status mapping.
//!
//! Every handler returns [`ApiError`] on failure; the body is always
//! `{"error": <message>, "code": <snake_case code>}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use loom_events::EventStoreError;
use loom_runtime::RuntimeError;
use serde_json::json;
use tracing::error;

// ── Error codes ─────────────────────────────────────────────────────

/// Record does not exist.
pub const NOT_FOUND: &str = "not_found";
/// Head moved since the caller read it.
pub const STALE_HEAD: &str = "stale_head";
/// Another turn holds the worldline.
pub const WORLDLINE_BUSY: &str = "worldline_busy";
/// Fork event is not on the source worldline.
pub const FORK_BOUNDARY_NOT_FOUND: &str = "fork_boundary_not_found";
/// Payload rejected by its event schema.
pub const INVALID_PAYLOAD: &str = "invalid_payload";
/// Request failed validation.
pub const INVALID_REQUEST: &str = "invalid_request";
/// Anything else.
pub const INTERNAL_ERROR: &str = "internal_error";

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing thread, worldline, event, or job.
    #[error("{0}")]
    NotFound(String),

    /// Concurrency conflict (stale head or busy worldline).
    #[error("{message}")]
    Conflict {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Well-formed request the store cannot apply.
    #[error("{message}")]
    Unprocessable {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Missing or malformed request fields.
    #[error("{0}")]
    BadRequest(String),

    /// Unexpected failure.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Validation failure.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => NOT_FOUND,
            Self::Conflict { code, .. } | Self::Unprocessable { code, .. } => code,
            Self::BadRequest(_) => INVALID_REQUEST,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }
}

impl From<EventStoreError> for ApiError {
    fn from(err: EventStoreError) -> Self {
        match err {
            e if e.is_not_found() => Self::NotFound(e.to_string()),
            e @ EventStoreError::StaleHead { .. } => Self::Conflict {
                code: STALE_HEAD,
                message: e.to_string(),
            },
            e @ EventStoreError::ForkBoundaryNotFound { .. } => Self::Unprocessable {
                code: FORK_BOUNDARY_NOT_FOUND,
                message: e.to_string(),
            },
            e @ EventStoreError::InvalidPayload { .. } => Self::Unprocessable {
                code: INVALID_PAYLOAD,
                message: e.to_string(),
            },
            EventStoreError::InvalidOperation(message) => Self::BadRequest(message),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Store(e) => e.into(),
            e => Self::Internal(format!("{}: {e}", e.reason_code())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (status, Json(body)).into_response()
    }
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Failure to bring the server up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Settings could not be loaded.
    #[error("settings error: {0}")]
    Settings(#[from] loom_settings::SettingsError),

    /// Store could not be opened or migrated.
    #[error("store error: {0}")]
    Store(#[from] EventStoreError),

    /// Job scheduler could not start.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Metrics recorder could not be installed.
    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    /// Bind, listen, or filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Database path is not valid UTF-8.
    #[error("invalid database path: {0}")]
    InvalidPath(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
