//! Background chat job records.

use loom_core::{JobId, ThreadId, WorldlineId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a [`ChatJob`].
///
/// Status only moves forward: `queued → running → completed | failed`, or
/// `queued → cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker.
    Queued,
    /// A worker is running the turn.
    Running,
    /// The turn completed.
    Completed,
    /// The turn failed; `error` is set.
    Failed,
    /// Cancelled while still queued.
    Cancelled,
}

impl JobStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [JobStatus; 5] = [
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown job status: {s}")),
        }
    }
}

/// A background-scheduled turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatJob {
    /// Job ID.
    pub id: JobId,
    /// Thread of the target worldline.
    pub thread_id: ThreadId,
    /// Worldline the turn runs against.
    pub worldline_id: WorldlineId,
    /// Current status.
    pub status: JobStatus,
    /// User message for the turn.
    pub message: String,
    /// Provider name.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Iteration cap for the turn.
    pub max_iterations: u32,
    /// Enqueue time.
    pub created_at: String,
    /// When a worker picked it up.
    pub started_at: Option<String>,
    /// When it reached a terminal status.
    pub finished_at: Option<String>,
    /// Final answer preview for completed jobs.
    pub result_summary: Option<String>,
    /// Failure description for failed jobs.
    pub error: Option<String>,
    /// First acknowledgment time.
    pub seen_at: Option<String>,
    /// 1-based rank among queued jobs of the same thread.
    pub queue_position: Option<i64>,
}
