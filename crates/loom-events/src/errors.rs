//! Error types for the event store subsystem.
//!
//! [`EventStoreError`] is returned by every store, manager, and repository
//! operation. Concurrency conflicts ([`EventStoreError::StaleHead`]) and
//! branch validation failures ([`EventStoreError::ForkBoundaryNotFound`]) have
//! dedicated variants so callers can retry or report them precisely.

use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// The worldline head moved since the caller last read it.
    #[error("stale head for worldline {worldline_id}: expected {}, found {}", display_head(.expected.as_deref()), display_head(.actual.as_deref()))]
    StaleHead {
        /// Worldline whose head was compared.
        worldline_id: String,
        /// Head the caller presented.
        expected: Option<String>,
        /// Head actually stored.
        actual: Option<String>,
    },

    /// The requested fork event is not reachable from the source head.
    #[error("fork boundary {event_id} not found in worldline {worldline_id}")]
    ForkBoundaryNotFound {
        /// Source worldline.
        worldline_id: String,
        /// Requested fork event.
        event_id: String,
    },

    /// An ancestry walk revisited an id.
    #[error("chain corrupted in worldline {worldline_id}: {id} visited twice")]
    ChainCorrupted {
        /// Worldline being walked.
        worldline_id: String,
        /// Repeated event or worldline id.
        id: String,
    },

    /// Payload does not match the schema for its event type.
    #[error("invalid payload for {event_type}: {message}")]
    InvalidPayload {
        /// Wire name of the event type.
        event_type: String,
        /// Deserialization failure.
        message: String,
    },

    /// Requested thread was not found.
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// Requested worldline was not found.
    #[error("worldline not found: {0}")]
    WorldlineNotFound(String),

    /// Requested event was not found.
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Requested job was not found.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Invalid operation on the event store.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

fn display_head(head: Option<&str>) -> &str {
    head.unwrap_or("<empty>")
}

impl EventStoreError {
    /// Whether this error is a lost compare-and-swap race.
    #[must_use]
    pub fn is_stale_head(&self) -> bool {
        matches!(self, Self::StaleHead { .. })
    }

    /// Whether this error names a missing record.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ThreadNotFound(_)
                | Self::WorldlineNotFound(_)
                | Self::EventNotFound(_)
                | Self::JobNotFound(_)
        )
    }
}

/// Convenience type alias for event store results.
pub type Result<T> = std::result::Result<T, EventStoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
