//! # loom-runtime
//!
//! Turn execution on top of the branchable event log.
//!
//! - [`turn`]: the turn loop shared by interactive streams, background jobs,
//!   and subagent children
//! - [`state_machine`]: legal turn-state moves
//! - [`dedup`]: argument canonicalization, intent keys, and the artifact memory
//!   consulted before any tool runs
//! - [`scheduler`]: background job workers with per-worldline exclusion
//! - [`subagents`]: blocking parallel fan-out over sibling branches
//! - [`provider`] / [`executor`]: collaborator traits

#![deny(unsafe_code)]

pub mod dedup;
pub mod errors;
pub mod executor;
pub mod locks;
pub mod persist;
pub mod provider;
pub mod scheduler;
pub mod sink;
pub mod state_machine;
pub mod stream_processor;
pub mod subagents;
pub mod tools;
pub mod turn;

pub use errors::{ReasonCode, Result, RuntimeError};
pub use executor::{
    ArtifactStore, Executor, ExecutorError, MemoryArtifactStore, ProducedArtifact, ToolInvocation,
    ToolOutput,
};
pub use locks::{WorldlineGuard, WorldlineLocks};
pub use provider::{
    Provider, ProviderError, ProviderEvent, ProviderFactory, ProviderRequest, ProviderStream,
};
pub use scheduler::JobScheduler;
pub use sink::FrameSink;
pub use state_machine::TurnStateMachine;
pub use tools::ToolKind;
pub use turn::{RuntimeConfig, TurnOutcome, TurnRequest, TurnRunner};
