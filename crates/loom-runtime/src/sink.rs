//! Per-turn frame delivery to an interactive client.
//!
//! Persisted events are sent with back-pressure; deltas are dropped when the
//! client buffer is full. A disconnected client stops delivery but never the
//! turn.

use loom_core::WorldlineId;
use loom_events::Event;
use loom_stream::{Delta, Frame, FrameEncoder};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Optional frame channel plus its encoder.
#[derive(Debug)]
pub struct FrameSink {
    tx: Option<mpsc::Sender<Frame>>,
    encoder: FrameEncoder,
    dropped_deltas: u64,
}

impl FrameSink {
    /// Sink delivering to `tx`.
    #[must_use]
    pub fn new(worldline_id: WorldlineId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx: Some(tx),
            encoder: FrameEncoder::new(worldline_id),
            dropped_deltas: 0,
        }
    }

    /// Sink for turns nobody watches (background jobs, subagent children).
    #[must_use]
    pub fn detached(worldline_id: WorldlineId) -> Self {
        Self {
            tx: None,
            encoder: FrameEncoder::new(worldline_id),
            dropped_deltas: 0,
        }
    }

    /// Whether a client is still attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    /// Deltas dropped because the client buffer was full.
    #[must_use]
    pub fn dropped_deltas(&self) -> u64 {
        self.dropped_deltas
    }

    /// Deliver a persisted event, waiting for buffer space.
    pub async fn event(&mut self, event: &Event) {
        if self.tx.is_none() {
            return;
        }
        let frame = self.encoder.event(event.clone());
        self.send(frame).await;
    }

    /// Deliver a delta if there is room.
    pub fn delta(&mut self, delta: Delta) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(self.encoder.delta(delta)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_deltas += 1;
                metrics::counter!("stream_deltas_dropped_total").increment(1);
            }
            Err(TrySendError::Closed(_)) => self.detach(),
        }
    }

    /// Deliver the terminal `done` frame.
    pub async fn done(&mut self) {
        if self.tx.is_some() {
            let frame = self.encoder.done();
            self.send(frame).await;
        }
    }

    /// Deliver the terminal `error` frame.
    pub async fn error(&mut self, message: &str, code: &str) {
        if self.tx.is_some() {
            let frame = self.encoder.error(message, Some(code.to_string()));
            self.send(frame).await;
        }
    }

    async fn send(&mut self, frame: Frame) {
        let Some(tx) = &self.tx else { return };
        if tx.send(frame).await.is_err() {
            self.detach();
        }
    }

    fn detach(&mut self) {
        debug!("stream client disconnected, turn continues");
        self.tx = None;
    }
}
