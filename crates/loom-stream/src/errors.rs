//! Stream parse errors. Always non-fatal to the stream.

use thiserror::Error;

/// A frame that could not be turned into a [`crate::Frame`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamParseError {
    /// Frame bytes were not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// `event:` name is not one of the protocol frame types.
    #[error("unknown frame type: {0}")]
    UnknownFrame(String),

    /// `data:` payload did not match the frame's schema.
    #[error("invalid {frame} frame payload: {message}")]
    InvalidPayload {
        /// Frame type the payload was parsed as.
        frame: String,
        /// Underlying parse error.
        message: String,
    },

    /// Frame had an `event:` line but no `data:`.
    #[error("frame has no data")]
    MissingData,
}
