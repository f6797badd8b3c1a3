//! Tool kinds the turn loop knows how to run.

use loom_events::{Producer, TurnState};
use loom_stream::DeltaKind;
use serde_json::Value;

/// A recognised tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// `run_sql`.
    Sql,
    /// `run_python`.
    Python,
    /// `spawn_subagents`.
    Subagents,
}

impl ToolKind {
    /// Look up a tool by the name the model used.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "run_sql" => Some(Self::Sql),
            "run_python" => Some(Self::Python),
            "spawn_subagents" => Some(Self::Subagents),
            _ => None,
        }
    }

    /// Canonical tool name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sql => "run_sql",
            Self::Python => "run_python",
            Self::Subagents => "spawn_subagents",
        }
    }

    /// Turn state while this tool runs.
    #[must_use]
    pub fn target_state(self) -> TurnState {
        match self {
            Self::Sql => TurnState::DataFetching,
            Self::Python | Self::Subagents => TurnState::Analyzing,
        }
    }

    /// Artifact producer, for tools that produce artifacts.
    #[must_use]
    pub fn producer(self) -> Option<Producer> {
        match self {
            Self::Sql => Some(Producer::Sql),
            Self::Python => Some(Producer::Python),
            Self::Subagents => None,
        }
    }

    /// Delta kind used while the call's arguments stream in.
    #[must_use]
    pub fn delta_kind(self) -> DeltaKind {
        match self {
            Self::Sql => DeltaKind::ToolCallSql,
            Self::Python => DeltaKind::ToolCallPython,
            Self::Subagents => DeltaKind::ToolCallSubagents,
        }
    }

    /// Whether the call's payload is blank.
    ///
    /// SQL needs `sql`, Python needs `code`, a fan-out needs `tasks` or `goal`.
    #[must_use]
    pub fn payload_is_empty(self, arguments: &Value) -> bool {
        let blank = |key: &str| {
            arguments
                .get(key)
                .and_then(Value::as_str)
                .is_none_or(|s| s.trim().is_empty())
        };
        match self {
            Self::Sql => blank("sql"),
            Self::Python => blank("code"),
            Self::Subagents => {
                let no_tasks = arguments
                    .get("tasks")
                    .and_then(Value::as_array)
                    .is_none_or(|tasks| {
                        tasks
                            .iter()
                            .all(|t| t.as_str().is_none_or(|s| s.trim().is_empty()))
                    });
                no_tasks && blank("goal")
            }
        }
    }
}
