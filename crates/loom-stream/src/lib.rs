//! # loom-stream
//!
//! The streaming wire protocol between a running turn and its client.
//!
//! - [`frame`]: `event` / `delta` / `done` / `error` frames, each carrying a `seq`
//! - [`encoder`]: server-side [`FrameEncoder`] assigning `seq` per stream
//! - [`decoder`]: byte-level [`FrameDecoder`] that buffers across chunk splits
//! - [`assembler`]: [`StreamingAssembler`] turning frames into callbacks and
//!   reconstructing in-flight tool-call drafts from deltas

#![deny(unsafe_code)]

pub mod assembler;
pub mod decoder;
pub mod encoder;
pub mod errors;
pub mod frame;

pub use assembler::{Draft, FrameHandler, StreamingAssembler};
pub use decoder::{FrameDecoder, RawFrame, decode_stream};
pub use encoder::FrameEncoder;
pub use errors::StreamParseError;
pub use frame::{Delta, DeltaFrame, DeltaKind, DoneFrame, ErrorFrame, EventFrame, Frame, FrameKind};
