//! Database row types for rows that need fallible parsing.
//!
//! These represent the raw column shape. Conversion to the public types
//! ([`Event`], [`ChatJob`]) happens through `TryFrom`, which is where an
//! unknown event type or job status in the database surfaces as an error.

use std::str::FromStr;

use crate::errors::EventStoreError;
use crate::types::{ChatJob, Event, EventType, JobStatus};

/// Raw row from the `events` table.
#[derive(Clone, Debug)]
pub struct EventRow {
    /// Event ID.
    pub id: String,
    /// Worldline ID.
    pub worldline_id: String,
    /// Per-worldline sequence.
    pub sequence: i64,
    /// Parent event ID.
    pub parent_event_id: Option<String>,
    /// Event type wire string.
    pub event_type: String,
    /// Payload JSON text.
    pub payload: String,
    /// Creation timestamp.
    pub created_at: String,
}

impl TryFrom<EventRow> for Event {
    type Error = EventStoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = EventType::from_str(&row.event_type)
            .map_err(EventStoreError::InvalidOperation)?;
        Ok(Event {
            id: row.id.into(),
            worldline_id: row.worldline_id.into(),
            sequence: row.sequence,
            event_type,
            payload: serde_json::from_str(&row.payload)?,
            parent_event_id: row.parent_event_id.map(Into::into),
            created_at: row.created_at,
        })
    }
}

/// Raw row from the `chat_jobs` table (plus the computed queue position).
#[derive(Clone, Debug)]
pub struct JobRow {
    /// Job ID.
    pub id: String,
    /// Thread ID.
    pub thread_id: String,
    /// Worldline ID.
    pub worldline_id: String,
    /// Status wire string.
    pub status: String,
    /// User message.
    pub message: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Iteration cap.
    pub max_iterations: u32,
    /// Enqueue time.
    pub created_at: String,
    /// Start time.
    pub started_at: Option<String>,
    /// Finish time.
    pub finished_at: Option<String>,
    /// Result preview.
    pub result_summary: Option<String>,
    /// Failure text.
    pub error: Option<String>,
    /// Acknowledgment time.
    pub seen_at: Option<String>,
    /// Rank among queued jobs of the thread.
    pub queue_position: Option<i64>,
}

impl TryFrom<JobRow> for ChatJob {
    type Error = EventStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).map_err(EventStoreError::InvalidOperation)?;
        Ok(ChatJob {
            id: row.id.into(),
            thread_id: row.thread_id.into(),
            worldline_id: row.worldline_id.into(),
            status,
            message: row.message,
            provider: row.provider,
            model: row.model,
            max_iterations: row.max_iterations,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            result_summary: row.result_summary,
            error: row.error,
            seen_at: row.seen_at,
            queue_position: row.queue_position,
        })
    }
}
