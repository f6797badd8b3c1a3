//! Worldline management: branching, timelines, engine-state restore.

mod manager;
mod restore;
mod summary;

pub use manager::{TimelinePage, WorldlineManager};
pub use restore::{RestoreSource, RestoredState};
pub use summary::{JobCounts, WorldlineSummary};
