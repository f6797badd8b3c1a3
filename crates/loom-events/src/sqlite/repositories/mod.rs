//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so the same calls work on a pooled connection or inside a transaction.

pub mod event;
pub mod job;
pub mod snapshot;
pub mod thread;
pub mod worldline;

pub use event::EventRepo;
pub use job::JobRepo;
pub use snapshot::SnapshotRepo;
pub use thread::ThreadRepo;
pub use worldline::WorldlineRepo;
