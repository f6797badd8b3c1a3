//! Chain writer: head-tracking appends for one turn.
//!
//! The writer remembers the head it last wrote and presents it as the
//! expected head. If another writer advanced the worldline in between, the
//! append fails with a stale head; the writer re-reads the head and retries a
//! bounded number of times.

use std::sync::Arc;

use loom_core::{EventId, WorldlineId};
use loom_events::{Event, EventPayload, EventStore, EventStoreError};
use tracing::warn;

use crate::errors::Result;

/// Appends events to one worldline on behalf of a turn.
#[derive(Debug)]
pub struct ChainWriter {
    store: Arc<EventStore>,
    worldline_id: WorldlineId,
    head: Option<EventId>,
    retry_limit: u32,
}

impl ChainWriter {
    /// Writer starting from the worldline's current head.
    pub fn open(store: Arc<EventStore>, worldline_id: WorldlineId, retry_limit: u32) -> Result<Self> {
        let head = store.get_head(&worldline_id)?;
        Ok(Self {
            store,
            worldline_id,
            head,
            retry_limit: retry_limit.max(1),
        })
    }

    /// Head as of the last successful append.
    #[must_use]
    pub fn head(&self) -> Option<&EventId> {
        self.head.as_ref()
    }

    /// Worldline being written.
    #[must_use]
    pub fn worldline_id(&self) -> &WorldlineId {
        &self.worldline_id
    }

    /// Append `payload`, retrying on a stale head.
    pub fn append(&mut self, payload: &EventPayload) -> Result<Event> {
        let mut attempt = 1;
        loop {
            match self.store.append(&self.worldline_id, self.head.as_ref(), payload) {
                Ok(event) => {
                    self.head = Some(event.id.clone());
                    return Ok(event);
                }
                Err(EventStoreError::StaleHead { actual, .. }) if attempt < self.retry_limit => {
                    metrics::counter!("stale_head_retries_total").increment(1);
                    warn!(
                        worldline_id = %self.worldline_id,
                        attempt,
                        event_type = %payload.event_type(),
                        "stale head, retrying with fresh head"
                    );
                    self.head = actual.map(EventId::from);
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
