//! Thread and worldline records.

use loom_core::{EventId, ThreadId, WorldlineId};
use serde::{Deserialize, Serialize};

/// Groups the worldlines of one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread ID.
    pub id: ThreadId,
    /// Display title.
    pub title: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// A branchable head-pointer chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worldline {
    /// Worldline ID.
    pub id: WorldlineId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Worldline this one was branched from.
    pub parent_worldline_id: Option<WorldlineId>,
    /// Event the branch starts at.
    pub forked_from_event_id: Option<EventId>,
    /// Last appended event (or the fork event for an untouched branch).
    pub head_event_id: Option<EventId>,
    /// Display name.
    pub name: String,
    /// Engine state must be restored before the next tool execution.
    pub needs_state_restore: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
}

impl Worldline {
    /// Whether this worldline was created by branching.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.parent_worldline_id.is_some()
    }
}
