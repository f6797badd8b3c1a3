//! Byte-level SSE frame decoding.
//!
//! Network chunks may split a frame anywhere, including inside a UTF-8 code
//! point or between `\r` and `\n`. The decoder keeps raw bytes buffered until a
//! blank line closes the frame, and [`FrameDecoder::finish`] flushes a trailing
//! frame the server never terminated.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::errors::StreamParseError;

/// One SSE block before JSON parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// `event:` field, if present.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental splitter of a byte stream into [`RawFrame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Bytes waiting for a frame boundary.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a chunk and return every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<RawFrame, StreamParseError>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(block) = self.next_block() {
            if let Some(frame) = parse_block(&block).transpose() {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever remains as a final frame.
    pub fn finish(&mut self) -> Option<Result<RawFrame, StreamParseError>> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        parse_block(&rest).transpose()
    }

    fn next_block(&mut self) -> Option<BytesMut> {
        let mut line_start = 0;
        while let Some(offset) = self.buffer[line_start..].iter().position(|&b| b == b'\n') {
            let newline = line_start + offset;
            let blank = trim_cr(&self.buffer[line_start..newline]).is_empty();
            if !blank {
                line_start = newline + 1;
                continue;
            }
            if line_start == 0 {
                // Leading blank line between frames.
                let _ = self.buffer.split_to(newline + 1);
                continue;
            }
            let block = self.buffer.split_to(line_start);
            let _ = self.buffer.split_to(newline + 1 - line_start);
            return Some(block);
        }
        None
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse one block. Comment-only blocks yield `Ok(None)`.
fn parse_block(block: &[u8]) -> Result<Option<RawFrame>, StreamParseError> {
    let text = std::str::from_utf8(block).map_err(|_| StreamParseError::InvalidUtf8)?;
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.trim().to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    match (event, data.is_empty()) {
        (None, true) => Ok(None),
        (Some(_), true) => Err(StreamParseError::MissingData),
        (event, false) => Ok(Some(RawFrame {
            event,
            data: data.join("\n"),
        })),
    }
}

/// Decode a chunked byte stream into raw frames, flushing the tail at the end.
pub fn decode_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<RawFrame, StreamParseError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, FrameDecoder::new(), Vec::new().into_iter(), false),
        |(mut stream, mut decoder, mut ready, mut ended)| async move {
            loop {
                if let Some(frame) = ready.next() {
                    return Some((frame, (stream, decoder, ready, ended)));
                }
                if ended {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(chunk)) => ready = decoder.push(&chunk).into_iter(),
                    Some(Err(e)) => {
                        warn!(error = %e, "frame stream read error");
                        ended = true;
                    }
                    None => {
                        ended = true;
                        ready = decoder.finish().into_iter().collect::<Vec<_>>().into_iter();
                    }
                }
            }
        },
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
