//! # loom-events
//!
//! Append-only, branchable event log with a `SQLite` backend.
//!
//! - **Event types**: `EventType` discriminator and typed `EventPayload` union,
//!   validated at the store boundary
//! - **Event store**: compare-and-swap append guarded by the worldline head,
//!   paginated reads, thread and worldline records
//! - **Worldline manager**: branching with reachability validation, timeline
//!   assembly across ancestors, engine-state restore from snapshots or replay
//! - **Job store**: persistence for background chat jobs with monotonic status
//! - **Migrations**: version-tracked SQL schema evolution

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;
pub mod types;
pub mod worldline;

pub use errors::{EventStoreError, Result};
pub use store::{EventPage, EventStore, JobFilter, JobStore, NewJob};
pub use types::{
    ALL_EVENT_TYPES, ArtifactRecord, ChatJob, EngineState, Event, EventPayload, EventType,
    JobStatus, Producer, StateEffect, Thread, TurnState, Worldline,
};
pub use worldline::{
    JobCounts, RestoreSource, RestoredState, TimelinePage, WorldlineManager, WorldlineSummary,
};
