//! [`WorldlineManager`]: creates worldlines and branches, assembles timelines.
//!
//! A branch starts exactly at its fork event: its head initially points at an
//! event owned by the source worldline, so walking `parent_event_id` from any
//! head yields the full linear history (ancestor segments up to each fork
//! boundary, then the worldline's own events) without ever reaching events
//! appended to the source after the fork.

use std::collections::HashSet;
use std::sync::Arc;

use loom_core::{EventId, ThreadId, WorldlineId, now_rfc3339};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::errors::{EventStoreError, Result};
use crate::sqlite::repositories::{EventRepo, ThreadRepo, WorldlineRepo};
use crate::store::EventStore;
use crate::types::{Event, Worldline};

/// One page of a worldline's visible timeline.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelinePage {
    /// Events oldest first.
    pub events: Vec<Event>,
    /// Number of timeline events consumed so far, absent on the last page.
    pub next_cursor: Option<usize>,
}

/// Creates, branches, and reads worldlines.
#[derive(Debug)]
pub struct WorldlineManager {
    store: Arc<EventStore>,
}

impl WorldlineManager {
    /// Create a manager over `store`.
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }

    /// The underlying event store.
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Create an empty root worldline in a thread.
    pub fn create_worldline(&self, thread_id: &ThreadId, name: &str) -> Result<Worldline> {
        let conn = self.store.conn()?;
        if ThreadRepo::get(&conn, thread_id)?.is_none() {
            return Err(EventStoreError::ThreadNotFound(thread_id.to_string()));
        }
        let worldline = Worldline {
            id: WorldlineId::new(),
            thread_id: thread_id.clone(),
            parent_worldline_id: None,
            forked_from_event_id: None,
            head_event_id: None,
            name: name.to_string(),
            needs_state_restore: false,
            created_at: now_rfc3339(),
        };
        WorldlineRepo::insert(&conn, &worldline)?;
        info!(worldline_id = %worldline.id, thread_id = %thread_id, "worldline created");
        Ok(worldline)
    }

    /// Branch `source_id` at `from_event_id`.
    ///
    /// Fails with [`EventStoreError::ForkBoundaryNotFound`] (writing nothing)
    /// unless `from_event_id` is reachable from the source's current head.
    #[instrument(skip_all, fields(source = %source_id, from_event_id = %from_event_id))]
    pub fn branch(
        &self,
        source_id: &WorldlineId,
        from_event_id: &EventId,
        name: &str,
    ) -> Result<Worldline> {
        let mut conn = self.store.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let source = WorldlineRepo::get(&tx, source_id)?
            .ok_or_else(|| EventStoreError::WorldlineNotFound(source_id.to_string()))?;
        let reachable = match &source.head_event_id {
            Some(head) => chain_contains(&tx, source_id, head, from_event_id)?,
            None => false,
        };
        if !reachable {
            warn!("fork boundary not reachable from source head");
            return Err(EventStoreError::ForkBoundaryNotFound {
                worldline_id: source_id.to_string(),
                event_id: from_event_id.to_string(),
            });
        }

        let branch = Worldline {
            id: WorldlineId::new(),
            thread_id: source.thread_id,
            parent_worldline_id: Some(source_id.clone()),
            forked_from_event_id: Some(from_event_id.clone()),
            head_event_id: Some(from_event_id.clone()),
            name: name.to_string(),
            needs_state_restore: true,
            created_at: now_rfc3339(),
        };
        WorldlineRepo::insert(&tx, &branch)?;
        tx.commit()?;

        info!(worldline_id = %branch.id, "branch created");
        Ok(branch)
    }

    /// Linear view of everything visible from the worldline's head, oldest first.
    pub fn timeline(&self, worldline_id: &WorldlineId) -> Result<Vec<Event>> {
        let conn = self.store.conn()?;
        let worldline = WorldlineRepo::get(&conn, worldline_id)?
            .ok_or_else(|| EventStoreError::WorldlineNotFound(worldline_id.to_string()))?;
        match &worldline.head_event_id {
            Some(head) => checked_chain(&conn, worldline_id, head),
            None => Ok(Vec::new()),
        }
    }

    /// Page through [`Self::timeline`]; `cursor` counts events already read.
    pub fn timeline_page(
        &self,
        worldline_id: &WorldlineId,
        cursor: usize,
        limit: usize,
    ) -> Result<TimelinePage> {
        let timeline = self.timeline(worldline_id)?;
        let limit = limit.max(1);
        let end = cursor.saturating_add(limit).min(timeline.len());
        let events = timeline.get(cursor..end).map(<[Event]>::to_vec).unwrap_or_default();
        let next_cursor = (end < timeline.len()).then_some(end);
        Ok(TimelinePage {
            events,
            next_cursor,
        })
    }

    /// The worldline and its ancestors, root first.
    pub fn lineage(&self, worldline_id: &WorldlineId) -> Result<Vec<Worldline>> {
        let conn = self.store.conn()?;
        let mut seen = HashSet::new();
        let mut lineage = Vec::new();
        let mut next = Some(worldline_id.clone());

        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                return Err(EventStoreError::ChainCorrupted {
                    worldline_id: worldline_id.to_string(),
                    id: id.to_string(),
                });
            }
            let worldline = WorldlineRepo::get(&conn, &id)?
                .ok_or_else(|| EventStoreError::WorldlineNotFound(id.to_string()))?;
            next = worldline.parent_worldline_id.clone();
            lineage.push(worldline);
        }
        lineage.reverse();
        Ok(lineage)
    }
}

/// Walk `parent_event_id` from `head` looking for `target`, refusing loops.
fn chain_contains(
    conn: &Connection,
    worldline_id: &WorldlineId,
    head: &EventId,
    target: &EventId,
) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut cursor = Some(head.to_string());
    while let Some(id) = cursor {
        if id == target.as_str() {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            return Err(EventStoreError::ChainCorrupted {
                worldline_id: worldline_id.to_string(),
                id,
            });
        }
        cursor = EventRepo::get_parent_id(conn, &id)?.flatten();
    }
    Ok(false)
}

/// Root-first chain ending at `head`, verified loop-free.
pub(crate) fn checked_chain(
    conn: &Connection,
    worldline_id: &WorldlineId,
    head: &EventId,
) -> Result<Vec<Event>> {
    let chain = EventRepo::get_chain(conn, head)?;
    let mut seen = HashSet::with_capacity(chain.len());
    for event in &chain {
        if !seen.insert(event.id.as_str()) {
            return Err(EventStoreError::ChainCorrupted {
                worldline_id: worldline_id.to_string(),
                id: event.id.to_string(),
            });
        }
    }
    Ok(chain)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventPayload, UserMessagePayload};
    use assert_matches::assert_matches;
    use loom_core::TurnId;

    struct Fixture {
        store: Arc<EventStore>,
        manager: WorldlineManager,
        main: Worldline,
    }

    fn setup() -> Fixture {
        let store = Arc::new(EventStore::in_memory().unwrap());
        let manager = WorldlineManager::new(store.clone());
        let thread = store.create_thread("t").unwrap();
        let main = manager.create_worldline(&thread.id, "main").unwrap();
        Fixture {
            store,
            manager,
            main,
        }
    }

    fn append(store: &EventStore, wl: &WorldlineId, content: &str) -> Event {
        let head = store.get_head(wl).unwrap();
        store
            .append(
                wl,
                head.as_ref(),
                &EventPayload::UserMessage(UserMessagePayload {
                    turn_id: TurnId::new(),
                    content: content.into(),
                    rerun_requested: false,
                }),
            )
            .unwrap()
    }

    fn ids(events: &[Event]) -> Vec<String> {
        events.iter().map(|e| e.payload["content"].as_str().unwrap().to_string()).collect()
    }

    #[test]
    fn branch_sees_history_up_to_fork_only() {
        let f = setup();
        let _e1 = append(&f.store, &f.main.id, "e1");
        let e2 = append(&f.store, &f.main.id, "e2");
        let _e3 = append(&f.store, &f.main.id, "e3");

        let b1 = f.manager.branch(&f.main.id, &e2.id, "b1").unwrap();
        assert_eq!(b1.forked_from_event_id.as_ref(), Some(&e2.id));
        assert_eq!(b1.head_event_id.as_ref(), Some(&e2.id));
        assert_eq!(b1.parent_worldline_id.as_ref(), Some(&f.main.id));
        assert!(b1.needs_state_restore);

        assert_eq!(ids(&f.manager.timeline(&b1.id).unwrap()), vec!["e1", "e2"]);

        let _e4 = append(&f.store, &f.main.id, "e4");
        let _b = append(&f.store, &b1.id, "b-1");
        assert_eq!(
            ids(&f.manager.timeline(&b1.id).unwrap()),
            vec!["e1", "e2", "b-1"]
        );
        assert_eq!(
            ids(&f.manager.timeline(&f.main.id).unwrap()),
            vec!["e1", "e2", "e3", "e4"]
        );
    }

    #[test]
    fn branch_of_branch_concatenates_segments() {
        let f = setup();
        let _e1 = append(&f.store, &f.main.id, "e1");
        let e2 = append(&f.store, &f.main.id, "e2");
        let b1 = f.manager.branch(&f.main.id, &e2.id, "b1").unwrap();
        let b1e = append(&f.store, &b1.id, "b1-1");
        let _ = append(&f.store, &b1.id, "b1-2");

        let b2 = f.manager.branch(&b1.id, &b1e.id, "b2").unwrap();
        let _ = append(&f.store, &b2.id, "b2-1");
        assert_eq!(
            ids(&f.manager.timeline(&b2.id).unwrap()),
            vec!["e1", "e2", "b1-1", "b2-1"]
        );

        let lineage = f.manager.lineage(&b2.id).unwrap();
        let names: Vec<_> = lineage.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["main", "b1", "b2"]);
    }

    #[test]
    fn branch_from_ancestor_event_through_branch() {
        let f = setup();
        let e1 = append(&f.store, &f.main.id, "e1");
        let e2 = append(&f.store, &f.main.id, "e2");
        let b1 = f.manager.branch(&f.main.id, &e2.id, "b1").unwrap();
        let _ = append(&f.store, &b1.id, "b1-1");

        let b2 = f.manager.branch(&b1.id, &e1.id, "b2").unwrap();
        assert_eq!(ids(&f.manager.timeline(&b2.id).unwrap()), vec!["e1"]);
    }

    #[test]
    fn unreachable_fork_boundary_creates_nothing() {
        let f = setup();
        let _ = append(&f.store, &f.main.id, "e1");
        let e2 = append(&f.store, &f.main.id, "e2");
        let b1 = f.manager.branch(&f.main.id, &e2.id, "b1").unwrap();
        let b1e = append(&f.store, &b1.id, "b1-1");

        let err = f
            .manager
            .branch(&f.main.id, &EventId::from("nonexistent"), "x")
            .unwrap_err();
        assert_matches!(err, EventStoreError::ForkBoundaryNotFound { .. });

        let err = f.manager.branch(&f.main.id, &b1e.id, "x").unwrap_err();
        assert_matches!(err, EventStoreError::ForkBoundaryNotFound { .. });

        assert_eq!(f.store.list_worldlines(&f.main.thread_id).unwrap().len(), 2);
    }

    #[test]
    fn branch_of_empty_worldline_fails() {
        let f = setup();
        let err = f
            .manager
            .branch(&f.main.id, &EventId::from("evt_any"), "x")
            .unwrap_err();
        assert_matches!(err, EventStoreError::ForkBoundaryNotFound { .. });
    }

    #[test]
    fn branch_of_missing_source() {
        let f = setup();
        let err = f
            .manager
            .branch(&WorldlineId::from("wl_x"), &EventId::from("evt_any"), "x")
            .unwrap_err();
        assert_matches!(err, EventStoreError::WorldlineNotFound(_));
    }

    #[test]
    fn chain_is_a_simple_list() {
        let f = setup();
        for i in 0..20 {
            let _ = append(&f.store, &f.main.id, &format!("m{i}"));
        }
        let timeline = f.manager.timeline(&f.main.id).unwrap();
        assert_eq!(timeline.len(), 20);
        assert!(timeline[0].parent_event_id.is_none());
        for pair in timeline.windows(2) {
            assert_eq!(pair[1].parent_event_id.as_ref(), Some(&pair[0].id));
        }
    }

    #[test]
    fn timeline_pages_with_offset_cursor() {
        let f = setup();
        for i in 0..5 {
            let _ = append(&f.store, &f.main.id, &format!("m{i}"));
        }
        let p1 = f.manager.timeline_page(&f.main.id, 0, 2).unwrap();
        assert_eq!(ids(&p1.events), vec!["m0", "m1"]);
        assert_eq!(p1.next_cursor, Some(2));
        let p3 = f.manager.timeline_page(&f.main.id, 4, 2).unwrap();
        assert_eq!(ids(&p3.events), vec!["m4"]);
        assert_eq!(p3.next_cursor, None);
        let past = f.manager.timeline_page(&f.main.id, 10, 2).unwrap();
        assert!(past.events.is_empty());
    }

    #[test]
    fn create_worldline_requires_thread() {
        let f = setup();
        let err = f
            .manager
            .create_worldline(&ThreadId::from("thr_x"), "m")
            .unwrap_err();
        assert_matches!(err, EventStoreError::ThreadNotFound(_));
    }
}
