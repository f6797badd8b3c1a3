//! # loom-core
//!
//! Foundation types shared by every Loom crate:
//!
//! - **Branded IDs**: `EventId`, `WorldlineId`, `ThreadId`, `JobId`, `CallId`,
//!   `TurnId`, `ArtifactId` as prefixed newtypes over UUID v7 strings
//! - **Text helpers**: char-boundary-safe previews and whitespace collapsing
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber
//! - **Time**: RFC 3339 timestamp helper used by every persisted record

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod text;

pub use ids::{ArtifactId, CallId, EventId, JobId, ThreadId, TurnId, WorldlineId};

/// Current UTC time as an RFC 3339 string (millisecond precision).
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
