//! The persisted [`Event`] record and its type discriminator.

use loom_core::{EventId, WorldlineId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::payloads::{
    AssistantTextPayload, DataImportedPayload, SourceAttachedPayload, SourceDetachedPayload,
    StateTransitionPayload, SubagentCallPayload, SubagentResultPayload, ToolCallPayload,
    ToolCallSkippedPayload, ToolResultPayload, UserMessagePayload,
};

define_events! {
    events {
        /// Message typed by the user; opens a turn.
        UserMessage => "user_message" => UserMessagePayload,
        /// Planning text the model emitted alongside a tool call.
        AssistantPlan => "assistant_plan" => AssistantTextPayload,
        /// Final assistant answer for a turn.
        AssistantMessage => "assistant_message" => AssistantTextPayload,
        /// Turn state machine transition.
        StateTransition => "state_transition" => StateTransitionPayload,
        /// SQL tool call about to execute.
        ToolCallSql => "tool_call_sql" => ToolCallPayload,
        /// SQL tool result.
        ToolResultSql => "tool_result_sql" => ToolResultPayload,
        /// Python tool call about to execute.
        ToolCallPython => "tool_call_python" => ToolCallPayload,
        /// Python tool result.
        ToolResultPython => "tool_result_python" => ToolResultPayload,
        /// Subagent fan-out started on the parent chain.
        ToolCallSubagents => "tool_call_subagents" => SubagentCallPayload,
        /// Aggregated subagent fan-out result.
        ToolResultSubagents => "tool_result_subagents" => SubagentResultPayload,
        /// A tool call that a guard refused to execute.
        ToolCallSkipped => "tool_call_skipped" => ToolCallSkippedPayload,
        /// A table was imported into the analytic engine.
        DataImported => "data_imported" => DataImportedPayload,
        /// An external source was attached to the analytic engine.
        SourceAttached => "source_attached" => SourceAttachedPayload,
        /// An external source was detached.
        SourceDetached => "source_detached" => SourceDetachedPayload,
    }
    domain_groups {
        /// Tool call events (including the subagent fan-out call).
        is_tool_call => [ToolCallSql, ToolCallPython, ToolCallSubagents],
        /// Tool result events (including the subagent aggregate).
        is_tool_result => [ToolResultSql, ToolResultPython, ToolResultSubagents],
        /// Conversation messages shown to the user.
        is_message => [UserMessage, AssistantMessage],
        /// Events that always mutate analytic-engine state.
        is_engine_mutation => [DataImported, SourceAttached, SourceDetached],
    }
}

/// An immutable fact appended to a worldline's chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID.
    pub id: EventId,
    /// Worldline the event was appended to.
    pub worldline_id: WorldlineId,
    /// Position within its own worldline (1-based).
    pub sequence: i64,
    /// Type discriminator.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Payload body, validated against `event_type` on append.
    pub payload: Value,
    /// Previous event in the chain (`None` for a root event).
    pub parent_event_id: Option<EventId>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl Event {
    /// Deserialize the payload into its typed variant.
    pub fn typed_payload(&self) -> Result<EventPayload, serde_json::Error> {
        EventPayload::from_parts(self.event_type, self.payload.clone())
    }

    /// `turn_id` field of the payload, if the event belongs to a turn.
    #[must_use]
    pub fn turn_id(&self) -> Option<&str> {
        self.payload.get("turn_id").and_then(Value::as_str)
    }

    /// `call_id` field of the payload, if the event belongs to a tool call.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        self.payload.get("call_id").and_then(Value::as_str)
    }

    /// Whether replaying this event changes analytic-engine state.
    #[must_use]
    pub fn is_state_mutating(&self) -> bool {
        if self.event_type.is_engine_mutation() {
            return true;
        }
        matches!(self.event_type, EventType::ToolResultSql | EventType::ToolResultPython)
            && self
                .payload
                .get("state_effects")
                .and_then(Value::as_array)
                .is_some_and(|effects| !effects.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
