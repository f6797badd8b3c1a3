//! Per-worldline activity summaries for a thread.

use loom_core::{EventId, ThreadId, WorldlineId};
use serde::Serialize;

use super::manager::WorldlineManager;
use crate::errors::{EventStoreError, Result};
use crate::sqlite::repositories::{EventRepo, JobRepo, ThreadRepo, WorldlineRepo};
use crate::types::{EventType, JobStatus};

/// Job counts for one worldline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Queued jobs.
    pub queued: i64,
    /// Running jobs.
    pub running: i64,
    /// Completed jobs.
    pub completed: i64,
    /// Failed jobs.
    pub failed: i64,
    /// Cancelled jobs.
    pub cancelled: i64,
    /// Status of the newest job.
    pub latest_status: Option<JobStatus>,
}

/// Activity summary for one worldline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorldlineSummary {
    /// Worldline ID.
    pub worldline_id: WorldlineId,
    /// Display name.
    pub name: String,
    /// Source worldline for branches.
    pub parent_worldline_id: Option<WorldlineId>,
    /// Fork event for branches.
    pub forked_from_event_id: Option<EventId>,
    /// User and assistant messages owned by the worldline.
    pub message_count: i64,
    /// Newest owned event time.
    pub last_event_at: Option<String>,
    /// Job counts.
    pub jobs: JobCounts,
    /// Newest of event, job, and creation times.
    pub last_activity: String,
}

impl WorldlineManager {
    /// Summaries for every worldline of a thread, in creation order.
    pub fn summaries(&self, thread_id: &ThreadId) -> Result<Vec<WorldlineSummary>> {
        let conn = self.store().conn()?;
        if ThreadRepo::get(&conn, thread_id)?.is_none() {
            return Err(EventStoreError::ThreadNotFound(thread_id.to_string()));
        }

        let mut summaries = Vec::new();
        for worldline in WorldlineRepo::list_by_thread(&conn, thread_id)? {
            let message_count = EventRepo::count_by_types(
                &conn,
                &worldline.id,
                &[EventType::UserMessage, EventType::AssistantMessage],
            )?;
            let last_event_at = EventRepo::last_created_at(&conn, &worldline.id)?;
            let counts = JobRepo::status_counts(&conn, &worldline.id)?;
            let latest = JobRepo::latest_for_worldline(&conn, &worldline.id)?;

            let last_activity = [
                Some(worldline.created_at.clone()),
                last_event_at.clone(),
                latest.as_ref().map(|(_, ts)| ts.clone()),
            ]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or_default();

            summaries.push(WorldlineSummary {
                worldline_id: worldline.id,
                name: worldline.name,
                parent_worldline_id: worldline.parent_worldline_id,
                forked_from_event_id: worldline.forked_from_event_id,
                message_count,
                last_event_at,
                jobs: JobCounts {
                    queued: counts.queued,
                    running: counts.running,
                    completed: counts.completed,
                    failed: counts.failed,
                    cancelled: counts.cancelled,
                    latest_status: latest.map(|(status, _)| status),
                },
                last_activity,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventStore, JobStore, NewJob};
    use crate::types::{AssistantTextPayload, EventPayload, UserMessagePayload};
    use loom_core::TurnId;
    use std::sync::Arc;

    #[test]
    fn summaries_count_messages_and_jobs() {
        let store = Arc::new(EventStore::in_memory().unwrap());
        let manager = WorldlineManager::new(store.clone());
        let jobs = JobStore::new(store.pool().clone());
        let thread = store.create_thread("t").unwrap();
        let main = manager.create_worldline(&thread.id, "main").unwrap();

        let turn_id = TurnId::new();
        let e1 = store
            .append(
                &main.id,
                None,
                &EventPayload::UserMessage(UserMessagePayload {
                    turn_id: turn_id.clone(),
                    content: "q".into(),
                    rerun_requested: false,
                }),
            )
            .unwrap();
        let e2 = store
            .append(
                &main.id,
                Some(&e1.id),
                &EventPayload::AssistantMessage(AssistantTextPayload {
                    turn_id,
                    content: "a".into(),
                }),
            )
            .unwrap();
        let branch = manager.branch(&main.id, &e2.id, "what-if").unwrap();

        let job = jobs
            .enqueue(&NewJob {
                worldline_id: main.id.clone(),
                message: "m".into(),
                provider: "p".into(),
                model: "x".into(),
                max_iterations: 3,
            })
            .unwrap();
        let _ = jobs.cancel(&job.id).unwrap();

        let summaries = manager.summaries(&thread.id).unwrap();
        assert_eq!(summaries.len(), 2);
        let main_summary = &summaries[0];
        assert_eq!(main_summary.message_count, 2);
        assert_eq!(main_summary.jobs.cancelled, 1);
        assert_eq!(main_summary.jobs.latest_status, Some(JobStatus::Cancelled));
        assert!(main_summary.last_event_at.is_some());

        let branch_summary = &summaries[1];
        assert_eq!(branch_summary.worldline_id, branch.id);
        assert_eq!(branch_summary.message_count, 0);
        assert_eq!(branch_summary.jobs, JobCounts::default());
        assert_eq!(branch_summary.last_activity, branch.created_at);
    }
}
