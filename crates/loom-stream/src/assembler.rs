//! Client-side stream assembly.
//!
//! [`StreamingAssembler`] sits between the byte stream and the presentation
//! layer. It drops replayed frames (by `seq`), fires `done` once, and rebuilds
//! in-flight drafts from deltas:
//!
//! - deltas for the same `call_id` concatenate in arrival order
//! - a delta without a `call_id` lands in the single provisional draft for its
//!   kind, which is re-keyed (content kept) once a delta names the id
//! - a persisted event for the same call (or kind) clears the draft

use std::collections::HashMap;

use loom_events::EventType;
use tracing::debug;

use crate::decoder::{FrameDecoder, RawFrame};
use crate::errors::StreamParseError;
use crate::frame::{Delta, DeltaKind, DoneFrame, ErrorFrame, EventFrame, Frame};

/// Callbacks driven by a [`StreamingAssembler`].
pub trait FrameHandler {
    /// A persisted event arrived.
    fn on_event(&mut self, frame: &EventFrame);

    /// A draft changed.
    fn on_draft(&mut self, _draft: &Draft) {}

    /// A draft was superseded by its persisted event.
    fn on_draft_cleared(&mut self, _draft: &Draft) {}

    /// The turn finished. Called at most once per stream.
    fn on_done(&mut self, frame: &DoneFrame);

    /// The turn failed.
    fn on_error(&mut self, _frame: &ErrorFrame) {}

    /// A frame could not be parsed. Processing continues.
    fn on_parse_error(&mut self, _error: &StreamParseError) {}
}

/// Content accumulated from deltas ahead of its persisted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draft {
    /// What is being drafted.
    pub kind: DeltaKind,
    /// Resolved call id (`None` while provisional).
    pub call_id: Option<String>,
    /// Concatenated fragments.
    pub content: String,
    /// Whether the final fragment arrived.
    pub complete: bool,
}

impl Draft {
    fn new(kind: DeltaKind, call_id: Option<String>) -> Self {
        Self {
            kind,
            call_id,
            content: String::new(),
            complete: false,
        }
    }
}

/// Reassembles a frame stream into handler callbacks.
#[derive(Debug)]
pub struct StreamingAssembler<H> {
    decoder: FrameDecoder,
    handler: H,
    last_seq: Option<u64>,
    done: bool,
    drafts: HashMap<String, Draft>,
    provisional: HashMap<DeltaKind, Draft>,
}

impl<H: FrameHandler> StreamingAssembler<H> {
    /// Assembler dispatching to `handler`.
    pub fn new(handler: H) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            handler,
            last_seq: None,
            done: false,
            drafts: HashMap::new(),
            provisional: HashMap::new(),
        }
    }

    /// Feed a network chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        for raw in self.decoder.push(chunk) {
            self.handle_raw(raw);
        }
    }

    /// End of stream: flush a trailing unterminated frame.
    pub fn finish(&mut self) {
        if let Some(raw) = self.decoder.finish() {
            self.handle_raw(raw);
        }
    }

    /// Feed an already-parsed frame.
    pub fn apply(&mut self, frame: Frame) {
        let seq = frame.seq();
        if self.last_seq.is_some_and(|last| seq <= last) {
            debug!(seq, last_seq = ?self.last_seq, "dropping replayed frame");
            return;
        }
        self.last_seq = Some(seq);

        match frame {
            Frame::Event(f) => {
                self.clear_drafts_for(&f);
                self.handler.on_event(&f);
            }
            Frame::Delta(f) => self.apply_delta(f.delta),
            Frame::Done(f) => {
                if self.done {
                    debug!(seq, "ignoring second done frame");
                    return;
                }
                self.done = true;
                self.handler.on_done(&f);
            }
            Frame::Error(f) => self.handler.on_error(&f),
        }
    }

    /// Whether a `done` frame has been delivered.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Highest `seq` delivered so far.
    #[must_use]
    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Draft keyed by a resolved call id.
    #[must_use]
    pub fn draft(&self, call_id: &str) -> Option<&Draft> {
        self.drafts.get(call_id)
    }

    /// Provisional draft awaiting id resolution.
    #[must_use]
    pub fn provisional(&self, kind: DeltaKind) -> Option<&Draft> {
        self.provisional.get(&kind)
    }

    /// The handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume the assembler, returning the handler.
    pub fn into_handler(self) -> H {
        self.handler
    }

    fn handle_raw(&mut self, raw: Result<RawFrame, StreamParseError>) {
        let parsed = raw.and_then(|raw| Frame::parse(raw.event.as_deref(), &raw.data));
        match parsed {
            Ok(frame) => self.apply(frame),
            Err(e) => {
                debug!(error = %e, "unparseable frame");
                self.handler.on_parse_error(&e);
            }
        }
    }

    fn apply_delta(&mut self, delta: Delta) {
        let draft = match delta.call_id {
            Some(call_id) => {
                if !self.drafts.contains_key(&call_id) {
                    let mut draft = self
                        .provisional
                        .remove(&delta.kind)
                        .unwrap_or_else(|| Draft::new(delta.kind, None));
                    draft.call_id = Some(call_id.clone());
                    let _ = self.drafts.insert(call_id.clone(), draft);
                }
                self.drafts.entry(call_id).or_insert_with_key(|id| Draft::new(delta.kind, Some(id.clone())))
            }
            None => self
                .provisional
                .entry(delta.kind)
                .or_insert_with(|| Draft::new(delta.kind, None)),
        };
        draft.content.push_str(&delta.delta);
        if delta.done == Some(true) {
            draft.complete = true;
        }
        self.handler.on_draft(draft);
    }

    fn clear_drafts_for(&mut self, frame: &EventFrame) {
        let event = &frame.event;
        let by_call = event.call_id().and_then(|id| self.drafts.remove(id));
        let cleared = match by_call {
            Some(draft) => Some(draft),
            None if event.event_type == EventType::ToolCallSkipped => None,
            None => DeltaKind::for_event_type(event.event_type)
                .and_then(|kind| self.provisional.remove(&kind)),
        };
        if let Some(draft) = cleared {
            self.handler.on_draft_cleared(&draft);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
