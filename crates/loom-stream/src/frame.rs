//! Wire frames.
//!
//! Every frame is written as an SSE block:
//!
//! ```text
//! event: delta
//! data: {"seq":4,"worldline_id":"wl_…","delta":{"type":"tool_call_sql","call_id":"call_…","delta":"SELECT"}}
//!
//! ```

use std::fmt;
use std::str::FromStr;

use loom_core::WorldlineId;
use loom_events::{Event, EventType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StreamParseError;

/// Frame type, used as the SSE `event:` name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// A persisted event.
    Event,
    /// Partial assistant text or tool-call content.
    Delta,
    /// End of the turn.
    Done,
    /// The turn failed.
    Error,
}

impl FrameKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Delta => "delta",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameKind {
    type Err = StreamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "delta" => Ok(Self::Delta),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(StreamParseError::UnknownFrame(other.to_string())),
        }
    }
}

/// What a delta is building.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Assistant text (plan or final message).
    AssistantText,
    /// Arguments of a SQL tool call.
    ToolCallSql,
    /// Arguments of a Python tool call.
    ToolCallPython,
    /// Arguments of a subagent fan-out.
    ToolCallSubagents,
}

impl DeltaKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssistantText => "assistant_text",
            Self::ToolCallSql => "tool_call_sql",
            Self::ToolCallPython => "tool_call_python",
            Self::ToolCallSubagents => "tool_call_subagents",
        }
    }

    /// Delta kind drafting the content a persisted event of `event_type` carries.
    #[must_use]
    pub fn for_event_type(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::AssistantPlan | EventType::AssistantMessage => Some(Self::AssistantText),
            EventType::ToolCallSql => Some(Self::ToolCallSql),
            EventType::ToolCallPython => Some(Self::ToolCallPython),
            EventType::ToolCallSubagents => Some(Self::ToolCallSubagents),
            _ => None,
        }
    }
}

/// Body of a `delta` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// What is being drafted.
    #[serde(rename = "type")]
    pub kind: DeltaKind,
    /// Tool call id, absent while the provider has not yet assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Content fragment.
    pub delta: String,
    /// Set on the last fragment of a draft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

/// `event` frame body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Stream sequence number.
    pub seq: u64,
    /// Worldline the turn runs on.
    pub worldline_id: WorldlineId,
    /// The persisted event.
    pub event: Event,
}

/// `delta` frame body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaFrame {
    /// Stream sequence number.
    pub seq: u64,
    /// Worldline the turn runs on.
    pub worldline_id: WorldlineId,
    /// Partial content.
    pub delta: Delta,
}

/// `done` frame body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneFrame {
    /// Stream sequence number.
    pub seq: u64,
    /// Worldline the turn ran on.
    pub worldline_id: WorldlineId,
    /// Always `true`.
    pub done: bool,
}

/// `error` frame body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Stream sequence number.
    pub seq: u64,
    /// Human-readable message.
    pub error: String,
    /// Machine-readable reason code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One protocol frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A persisted event.
    Event(EventFrame),
    /// Partial content.
    Delta(DeltaFrame),
    /// End of the turn.
    Done(DoneFrame),
    /// The turn failed.
    Error(ErrorFrame),
}

impl Frame {
    /// Frame type.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Event(_) => FrameKind::Event,
            Self::Delta(_) => FrameKind::Delta,
            Self::Done(_) => FrameKind::Done,
            Self::Error(_) => FrameKind::Error,
        }
    }

    /// Stream sequence number.
    #[must_use]
    pub fn seq(&self) -> u64 {
        match self {
            Self::Event(f) => f.seq,
            Self::Delta(f) => f.seq,
            Self::Done(f) => f.seq,
            Self::Error(f) => f.seq,
        }
    }

    /// JSON `data:` payload.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Event(f) => serde_json::to_string(f),
            Self::Delta(f) => serde_json::to_string(f),
            Self::Done(f) => serde_json::to_string(f),
            Self::Error(f) => serde_json::to_string(f),
        }
    }

    /// Full SSE block, terminated by a blank line.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("event: {}\ndata: {}\n\n", self.kind(), self.data()?))
    }

    /// Parse a frame from its SSE `event:` name and `data:` payload.
    ///
    /// Without a name, the frame type is inferred from the payload's keys.
    pub fn parse(name: Option<&str>, data: &str) -> Result<Self, StreamParseError> {
        let value: Value = serde_json::from_str(data).map_err(|e| StreamParseError::InvalidPayload {
            frame: name.unwrap_or("unnamed").to_string(),
            message: e.to_string(),
        })?;
        let kind = match name {
            Some(name) => name.parse::<FrameKind>()?,
            None => infer_kind(&value)?,
        };
        let invalid = |e: serde_json::Error| StreamParseError::InvalidPayload {
            frame: kind.as_str().to_string(),
            message: e.to_string(),
        };
        Ok(match kind {
            FrameKind::Event => Self::Event(serde_json::from_value(value).map_err(invalid)?),
            FrameKind::Delta => Self::Delta(serde_json::from_value(value).map_err(invalid)?),
            FrameKind::Done => Self::Done(serde_json::from_value(value).map_err(invalid)?),
            FrameKind::Error => Self::Error(serde_json::from_value(value).map_err(invalid)?),
        })
    }
}

fn infer_kind(value: &Value) -> Result<FrameKind, StreamParseError> {
    let obj = value
        .as_object()
        .ok_or_else(|| StreamParseError::UnknownFrame(value.to_string()))?;
    [FrameKind::Event, FrameKind::Delta, FrameKind::Done, FrameKind::Error]
        .into_iter()
        .find(|kind| obj.contains_key(kind.as_str()))
        .ok_or_else(|| StreamParseError::UnknownFrame("unnamed".to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
