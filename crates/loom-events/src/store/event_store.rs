//! The event store: compare-and-swap appends over an append-only log.
//!
//! [`EventStore::append`] is the only primitive that protects a worldline
//! from divergent chains. It reads the head, compares it with the caller's
//! `expected_head`, inserts the event with `parent_event_id = expected_head`,
//! and advances the head, all inside one immediate transaction. A mismatch
//! rolls back and returns [`EventStoreError::StaleHead`]; no locking beyond
//! the database's own write lock is involved, and retrying with a freshly
//! read head is the caller's decision.

use loom_core::{EventId, ThreadId, WorldlineId, now_rfc3339};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::errors::{EventStoreError, Result};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::{EventRepo, ThreadRepo, WorldlineRepo};
use crate::types::{Event, EventPayload, EventType, Thread, Worldline};

/// Default page size for [`EventStore::read_events`].
pub const DEFAULT_PAGE_SIZE: i64 = 100;
/// Maximum page size accepted by [`EventStore::read_events`].
pub const MAX_PAGE_SIZE: i64 = 1000;

/// One page of events in append order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventPage {
    /// Events in append order.
    pub events: Vec<Event>,
    /// Cursor for the next page, absent on the last page.
    pub next_cursor: Option<i64>,
}

/// Event store backed by a `SQLite` connection pool.
#[derive(Debug)]
pub struct EventStore {
    pool: ConnectionPool,
}

impl EventStore {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open a file-backed store and run pending migrations.
    pub fn open(path: &str, config: &ConnectionConfig) -> Result<Self> {
        let pool = connection::new_file(path, config)?;
        let _ = run_migrations(&*pool.get()?)?;
        Ok(Self::new(pool))
    }

    /// Open an in-memory store and run migrations.
    pub fn in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        let _ = run_migrations(&*pool.get()?)?;
        Ok(Self::new(pool))
    }

    /// The underlying pool (shared with [`crate::JobStore`]).
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─── Threads and worldlines ─────────────────────────────────────────

    /// Create a thread.
    pub fn create_thread(&self, title: &str) -> Result<Thread> {
        let thread = Thread {
            id: ThreadId::new(),
            title: title.to_string(),
            created_at: now_rfc3339(),
        };
        ThreadRepo::insert(&*self.conn()?, &thread)?;
        debug!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    /// Get a thread.
    pub fn get_thread(&self, thread_id: &ThreadId) -> Result<Thread> {
        ThreadRepo::get(&*self.conn()?, thread_id)?
            .ok_or_else(|| EventStoreError::ThreadNotFound(thread_id.to_string()))
    }

    /// Get a worldline.
    pub fn get_worldline(&self, worldline_id: &WorldlineId) -> Result<Worldline> {
        WorldlineRepo::get(&*self.conn()?, worldline_id)?
            .ok_or_else(|| EventStoreError::WorldlineNotFound(worldline_id.to_string()))
    }

    /// Worldlines of a thread in creation order.
    pub fn list_worldlines(&self, thread_id: &ThreadId) -> Result<Vec<Worldline>> {
        let conn = self.conn()?;
        if ThreadRepo::get(&conn, thread_id)?.is_none() {
            return Err(EventStoreError::ThreadNotFound(thread_id.to_string()));
        }
        WorldlineRepo::list_by_thread(&conn, thread_id)
    }

    /// Current head of a worldline (`None` when empty).
    pub fn get_head(&self, worldline_id: &WorldlineId) -> Result<Option<EventId>> {
        WorldlineRepo::get_head(&*self.conn()?, worldline_id)?
            .map(|head| head.map(EventId::from))
            .ok_or_else(|| EventStoreError::WorldlineNotFound(worldline_id.to_string()))
    }

    // ─── Events ─────────────────────────────────────────────────────────

    /// Get an event by ID.
    pub fn get_event(&self, event_id: &EventId) -> Result<Option<Event>> {
        EventRepo::get_by_id(&*self.conn()?, event_id)
    }

    /// Append a typed payload if the head still equals `expected_head`.
    pub fn append(
        &self,
        worldline_id: &WorldlineId,
        expected_head: Option<&EventId>,
        payload: &EventPayload,
    ) -> Result<Event> {
        let value = payload.to_value()?;
        self.append_checked(worldline_id, expected_head, payload.event_type(), value)
    }

    /// Append a raw payload, validating it against the schema of `event_type`.
    pub fn append_value(
        &self,
        worldline_id: &WorldlineId,
        expected_head: Option<&EventId>,
        event_type: EventType,
        payload: Value,
    ) -> Result<Event> {
        if let Err(e) = EventPayload::from_parts(event_type, payload.clone()) {
            return Err(EventStoreError::InvalidPayload {
                event_type: event_type.to_string(),
                message: e.to_string(),
            });
        }
        self.append_checked(worldline_id, expected_head, event_type, payload)
    }

    #[instrument(skip_all, fields(worldline_id = %worldline_id, event_type = %event_type))]
    fn append_checked(
        &self,
        worldline_id: &WorldlineId,
        expected_head: Option<&EventId>,
        event_type: EventType,
        payload: Value,
    ) -> Result<Event> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let actual = WorldlineRepo::get_head(&tx, worldline_id)?
            .ok_or_else(|| EventStoreError::WorldlineNotFound(worldline_id.to_string()))?;
        let expected = expected_head.map(EventId::as_str);
        if actual.as_deref() != expected {
            debug!(expected = ?expected, actual = ?actual, "stale head, append rejected");
            return Err(EventStoreError::StaleHead {
                worldline_id: worldline_id.to_string(),
                expected: expected.map(str::to_string),
                actual,
            });
        }

        let event = Event {
            id: EventId::new(),
            worldline_id: worldline_id.clone(),
            sequence: EventRepo::next_sequence(&tx, worldline_id)?,
            event_type,
            payload,
            parent_event_id: expected_head.cloned(),
            created_at: now_rfc3339(),
        };
        EventRepo::insert(&tx, &event)?;

        if !WorldlineRepo::advance_head(&tx, worldline_id, expected, &event.id)? {
            return Err(EventStoreError::StaleHead {
                worldline_id: worldline_id.to_string(),
                expected: expected.map(str::to_string),
                actual: WorldlineRepo::get_head(&tx, worldline_id)?.flatten(),
            });
        }
        tx.commit()?;

        debug!(event_id = %event.id, sequence = event.sequence, "event appended");
        Ok(event)
    }

    /// Events owned by a worldline in append order, after `cursor`
    /// (a sequence number; `None` starts from the beginning).
    pub fn read_events(
        &self,
        worldline_id: &WorldlineId,
        cursor: Option<i64>,
        limit: Option<i64>,
    ) -> Result<EventPage> {
        let conn = self.conn()?;
        if WorldlineRepo::get(&conn, worldline_id)?.is_none() {
            return Err(EventStoreError::WorldlineNotFound(worldline_id.to_string()));
        }
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let mut events =
            EventRepo::list_by_worldline(&conn, worldline_id, cursor.unwrap_or(0), limit + 1)?;
        let page_len = usize::try_from(limit).unwrap_or(usize::MAX);
        let has_more = events.len() > page_len;
        events.truncate(page_len);
        let next_cursor = if has_more {
            events.last().map(|e| e.sequence)
        } else {
            None
        };
        Ok(EventPage {
            events,
            next_cursor,
        })
    }

    /// Number of events owned by a worldline.
    pub fn count_events(&self, worldline_id: &WorldlineId) -> Result<i64> {
        EventRepo::count_by_worldline(&*self.conn()?, worldline_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
