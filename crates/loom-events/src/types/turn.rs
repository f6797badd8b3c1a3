//! Turn states as persisted in `state_transition` events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Before the turn starts.
    Idle,
    /// Model deciding what to do next.
    Planning,
    /// SQL tool running or just ran.
    DataFetching,
    /// Python or subagent tool running or just ran.
    Analyzing,
    /// Model composing the answer.
    Presenting,
    /// Turn finished successfully.
    Completed,
    /// Turn stopped on a failure.
    Error,
}

impl TurnState {
    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::DataFetching => "data_fetching",
            Self::Analyzing => "analyzing",
            Self::Presenting => "presenting",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether the turn loop stops in this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
