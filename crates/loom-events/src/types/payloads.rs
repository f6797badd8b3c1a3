//! Payload structs for every event type.
//!
//! Field names are the snake_case wire names stored in the `payload` column
//! and streamed to clients inside `event` frames.

use loom_core::{ArtifactId, CallId, EventId, TurnId, WorldlineId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::StateEffect;
use super::turn::TurnState;

/// Payload for `user_message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    /// Turn opened by this message.
    pub turn_id: TurnId,
    /// Message text.
    pub content: String,
    /// The user explicitly asked to rerun earlier tool calls.
    #[serde(default)]
    pub rerun_requested: bool,
}

/// Payload for `assistant_plan` and `assistant_message`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantTextPayload {
    /// Owning turn.
    pub turn_id: TurnId,
    /// Text content.
    pub content: String,
}

/// Payload for `state_transition`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionPayload {
    /// Owning turn.
    pub turn_id: TurnId,
    /// State before the move.
    pub from_state: TurnState,
    /// State after the move.
    pub to_state: TurnState,
    /// Snake_case reason code.
    pub reason: String,
    /// RFC 3339 time of the move.
    pub timestamp: String,
}

/// Payload for `tool_call_sql` and `tool_call_python`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Owning turn.
    pub turn_id: TurnId,
    /// Tool call ID.
    pub call_id: CallId,
    /// Tool name as requested by the model.
    pub tool_name: String,
    /// Raw arguments.
    pub arguments: Value,
    /// Normalized `(tool, arguments)` identity.
    pub dedup_key: String,
    /// Intent key predicted for the artifact this call produces.
    #[serde(default)]
    pub intent_key: String,
}

/// Which executor produced an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Producer {
    /// SQL executor.
    Sql,
    /// Python executor.
    Python,
}

impl Producer {
    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::Python => "python",
        }
    }
}

/// An artifact reference recorded inside a tool result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact ID.
    pub id: ArtifactId,
    /// Human-readable name (table, file, chart).
    pub name: String,
    /// Artifact type (e.g. `table`, `chart`, `file`).
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Tool call that produced it.
    pub source_call_id: CallId,
    /// Producing executor.
    pub producer: Producer,
    /// Identity used for cross-turn equivalence.
    pub logical_key: String,
    /// SHA-256 of the artifact content, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Payload for `tool_result_sql` and `tool_result_python`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    /// Owning turn.
    pub turn_id: TurnId,
    /// Tool call ID this result answers.
    pub call_id: CallId,
    /// Structured executor output.
    pub output: Value,
    /// Short text preview for the model and UI.
    pub preview: String,
    /// Whether execution failed.
    #[serde(default)]
    pub is_error: bool,
    /// Artifacts produced by the call.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    /// Engine-state changes caused by the call.
    #[serde(default)]
    pub state_effects: Vec<StateEffect>,
}

/// Payload for `tool_call_subagents`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentCallPayload {
    /// Owning (parent) turn.
    pub turn_id: TurnId,
    /// Tool call ID.
    pub call_id: CallId,
    /// One task per child worldline.
    pub tasks: Vec<String>,
    /// Event every child branches from.
    pub from_event_id: EventId,
    /// Per-child timeout in seconds.
    pub timeout_s: u64,
    /// Iteration cap for each child turn.
    pub max_iterations: u32,
}

/// Terminal outcome of one subagent child.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    /// Child turn completed.
    Completed,
    /// Child turn ended in error.
    Failed,
    /// Parent stopped waiting for the child.
    Timeout,
}

impl SubagentStatus {
    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

/// Per-task entry of the subagent aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentTaskResult {
    /// Task text given to the child.
    pub task: String,
    /// Terminal outcome.
    pub status: SubagentStatus,
    /// Child worldline.
    pub child_worldline_id: WorldlineId,
    /// Final answer or error text, truncated.
    pub preview: String,
}

/// Payload for `tool_result_subagents`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubagentResultPayload {
    /// Owning (parent) turn.
    pub turn_id: TurnId,
    /// Tool call ID this result answers.
    pub call_id: CallId,
    /// Per-task outcomes in task order.
    pub results: Vec<SubagentTaskResult>,
    /// Children that completed.
    pub completed_count: u32,
    /// Children that failed.
    pub failed_count: u32,
    /// Children the parent stopped waiting for.
    pub timed_out_count: u32,
}

/// Payload for `tool_call_skipped`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallSkippedPayload {
    /// Owning turn.
    pub turn_id: TurnId,
    /// Tool call ID that was skipped.
    pub call_id: CallId,
    /// Tool name as requested by the model.
    pub tool_name: String,
    /// Snake_case reason code.
    pub reason: String,
    /// Result handed back to the model in place of execution.
    pub synthetic_result: Value,
}

/// Payload for `data_imported`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataImportedPayload {
    /// Table name in the analytic engine.
    pub table: String,
    /// Where the data came from.
    pub source: String,
}

/// Payload for `source_attached`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceAttachedPayload {
    /// Alias the source is attached under.
    pub alias: String,
    /// Source location.
    pub uri: String,
}

/// Payload for `source_detached`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDetachedPayload {
    /// Alias being detached.
    pub alias: String,
}
