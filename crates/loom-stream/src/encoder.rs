//! Server-side frame construction.

use loom_core::WorldlineId;
use loom_events::Event;

use crate::frame::{Delta, DeltaFrame, DoneFrame, ErrorFrame, EventFrame, Frame};

/// Builds frames for one stream, numbering them `1, 2, 3, …`.
#[derive(Debug)]
pub struct FrameEncoder {
    worldline_id: WorldlineId,
    last_seq: u64,
}

impl FrameEncoder {
    /// Encoder for a turn on `worldline_id`.
    #[must_use]
    pub fn new(worldline_id: WorldlineId) -> Self {
        Self {
            worldline_id,
            last_seq: 0,
        }
    }

    /// Sequence number of the last frame built (0 before the first).
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Wrap a persisted event.
    pub fn event(&mut self, event: Event) -> Frame {
        Frame::Event(EventFrame {
            seq: self.bump(),
            worldline_id: self.worldline_id.clone(),
            event,
        })
    }

    /// Wrap a content fragment.
    pub fn delta(&mut self, delta: Delta) -> Frame {
        Frame::Delta(DeltaFrame {
            seq: self.bump(),
            worldline_id: self.worldline_id.clone(),
            delta,
        })
    }

    /// Terminal success frame.
    pub fn done(&mut self) -> Frame {
        Frame::Done(DoneFrame {
            seq: self.bump(),
            worldline_id: self.worldline_id.clone(),
            done: true,
        })
    }

    /// Terminal failure frame.
    pub fn error(&mut self, error: impl Into<String>, code: Option<String>) -> Frame {
        Frame::Error(ErrorFrame {
            seq: self.bump(),
            error: error.into(),
            code,
        })
    }

    fn bump(&mut self) -> u64 {
        self.last_seq += 1;
        self.last_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DeltaKind, FrameKind};

    #[test]
    fn seq_is_monotonic_across_kinds() {
        let mut enc = FrameEncoder::new(WorldlineId::from("wl_1"));
        let a = enc.delta(Delta {
            kind: DeltaKind::AssistantText,
            call_id: None,
            delta: "hi".into(),
            done: None,
        });
        let b = enc.error("boom", None);
        let c = enc.done();
        assert_eq!((a.seq(), b.seq(), c.seq()), (1, 2, 3));
        assert_eq!(c.kind(), FrameKind::Done);
        assert_eq!(enc.last_seq(), 3);
    }
}
