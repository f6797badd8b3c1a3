//! Runtime error types and reason codes.

use std::fmt;

use loom_events::{EventStoreError, TurnState};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutorError;
use crate::provider::ProviderError;

/// Errors that can occur during turn execution.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Event log or job persistence failure.
    #[error("Persistence error: {0}")]
    Store(#[from] EventStoreError),

    /// Model provider failure (creation or streaming).
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Move not allowed by the turn state table.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: TurnState,
        /// Requested state.
        to: TurnState,
    },

    /// Tool call with an empty `sql`/`code`/task payload.
    #[error("Empty payload for tool {tool_name}")]
    EmptyPayload {
        /// Tool name.
        tool_name: String,
    },

    /// The executor raised instead of returning a result.
    #[error("Tool error: {tool_name}: {source}")]
    ToolExecution {
        /// Tool name.
        tool_name: String,
        /// Executor failure.
        #[source]
        source: ExecutorError,
    },

    /// Tool name the runtime does not know.
    #[error("Unknown tool: {tool_name}")]
    UnknownTool {
        /// Tool name as requested.
        tool_name: String,
    },

    /// A subagent child tried to fan out again.
    #[error("Subagent fan-out not allowed at depth {depth}")]
    SubagentDepthExceeded {
        /// Depth of the requesting turn.
        depth: u32,
    },

    /// The turn used up its iterations without completing.
    #[error("Iteration cap of {max_iterations} reached")]
    IterationCap {
        /// Configured cap.
        max_iterations: u32,
    },

    /// Engine state could not be restored on a fresh branch.
    #[error("State restore failed: {0}")]
    Restore(ExecutorError),

    /// A subagent child outlived its timeout.
    #[error("Subagent on {child_worldline_id} timed out after {timeout_s}s")]
    SubagentTimeout {
        /// Child worldline.
        child_worldline_id: String,
        /// Timeout that elapsed.
        timeout_s: u64,
    },

    /// Internal / unexpected error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Reason code recorded when this error ends a turn.
    #[must_use]
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Store(_) => ReasonCode::PersistenceError,
            Self::Provider(_) => ReasonCode::ProviderError,
            Self::InvalidTransition { .. } => ReasonCode::InvalidTransition,
            Self::EmptyPayload { .. } => ReasonCode::EmptyPayload,
            Self::ToolExecution { .. } => ReasonCode::ToolExecutionFailed,
            Self::UnknownTool { .. } => ReasonCode::UnknownTool,
            Self::SubagentDepthExceeded { .. } => ReasonCode::SubagentDepthExceeded,
            Self::IterationCap { .. } => ReasonCode::IterationCapReached,
            Self::Restore(_) => ReasonCode::StateRestoreFailed,
            Self::SubagentTimeout { .. } => ReasonCode::SubagentTimeout,
            Self::Internal(_) => ReasonCode::InternalError,
        }
    }
}

/// Snake_case codes recorded on state transitions, skip events, and job errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// `idle -> planning` on a new user message.
    TurnStarted,
    /// `error -> planning` after a previously failed turn.
    ResumedAfterError,
    /// Entering a tool-execution state.
    ToolSelected,
    /// The model produced its final answer.
    FinalMessage,
    /// `presenting -> completed`.
    Presented,
    /// Identical call already ran in the dedup window.
    DuplicateToolCallSkipped,
    /// Equivalent artifact already in inventory.
    DuplicateArtifactPrevented,
    /// More than one tool call in a single response.
    ConcurrentToolCallRejected,
    /// Blank `sql`/`code`/tasks.
    EmptyPayload,
    /// Tool name not recognised.
    UnknownTool,
    /// Subagent child tried to fan out again.
    SubagentDepthExceeded,
    /// Move rejected by the state table.
    InvalidTransition,
    /// Provider creation or stream failure.
    ProviderError,
    /// Executor raised.
    ToolExecutionFailed,
    /// Engine state restore failed.
    StateRestoreFailed,
    /// Child outlived its timeout.
    SubagentTimeout,
    /// Iteration cap hit before completion.
    IterationCapReached,
    /// Event log write failed.
    PersistenceError,
    /// Unexpected failure (including a panicked job).
    InternalError,
    /// Job was running when its process stopped.
    Interrupted,
}

impl ReasonCode {
    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnStarted => "turn_started",
            Self::ResumedAfterError => "resumed_after_error",
            Self::ToolSelected => "tool_selected",
            Self::FinalMessage => "final_message",
            Self::Presented => "presented",
            Self::DuplicateToolCallSkipped => "duplicate_tool_call_skipped",
            Self::DuplicateArtifactPrevented => "duplicate_artifact_prevented",
            Self::ConcurrentToolCallRejected => "concurrent_tool_call_rejected",
            Self::EmptyPayload => "empty_payload",
            Self::UnknownTool => "unknown_tool",
            Self::SubagentDepthExceeded => "subagent_depth_exceeded",
            Self::InvalidTransition => "invalid_transition",
            Self::ProviderError => "provider_error",
            Self::ToolExecutionFailed => "tool_execution_failed",
            Self::StateRestoreFailed => "state_restore_failed",
            Self::SubagentTimeout => "subagent_timeout",
            Self::IterationCapReached => "iteration_cap_reached",
            Self::PersistenceError => "persistence_error",
            Self::InternalError => "internal_error",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_serde_matches_as_str() {
        for code in [
            ReasonCode::DuplicateToolCallSkipped,
            ReasonCode::ResumedAfterError,
            ReasonCode::IterationCapReached,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn errors_map_to_reason_codes() {
        let err = RuntimeError::InvalidTransition {
            from: TurnState::Planning,
            to: TurnState::Error,
        };
        assert_eq!(err.reason_code(), ReasonCode::InvalidTransition);
        assert_eq!(err.to_string(), "Invalid transition: planning -> error");

        let err = RuntimeError::EmptyPayload {
            tool_name: "run_sql".into(),
        };
        assert_eq!(err.reason_code(), ReasonCode::EmptyPayload);

        let err = RuntimeError::IterationCap { max_iterations: 4 };
        assert_eq!(err.reason_code(), ReasonCode::IterationCapReached);
        assert_eq!(err.to_string(), "Iteration cap of 4 reached");
    }

    #[test]
    fn store_errors_convert() {
        let err: RuntimeError = EventStoreError::WorldlineNotFound("wl_x".into()).into();
        assert_eq!(err.reason_code(), ReasonCode::PersistenceError);
        assert!(err.to_string().contains("wl_x"));
    }
}
