//! Persisted domain types: events, payloads, worldlines, jobs, engine state.

#[macro_use]
mod macros;

pub mod event;
pub mod job;
pub mod payloads;
pub mod state;
pub mod turn;
pub mod worldline;

pub use event::{ALL_EVENT_TYPES, Event, EventPayload, EventType};
pub use job::{ChatJob, JobStatus};
pub use payloads::{
    ArtifactRecord, AssistantTextPayload, DataImportedPayload, Producer, SourceAttachedPayload,
    SourceDetachedPayload, StateTransitionPayload, SubagentCallPayload, SubagentResultPayload,
    SubagentStatus, SubagentTaskResult, ToolCallPayload, ToolCallSkippedPayload,
    ToolResultPayload, UserMessagePayload,
};
pub use state::{EngineState, StateEffect, TableState};
pub use turn::TurnState;
pub use worldline::{Thread, Worldline};
