//! High-level store APIs over the `SQLite` repositories.

pub mod event_store;
pub mod job_store;

pub use crate::sqlite::repositories::job::{JobFilter, StatusCounts};
pub use event_store::{EventPage, EventStore};
pub use job_store::{JobStore, NewJob};
