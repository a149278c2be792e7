//! Error types for the framing layer.
//!
//! - [`FramingError`]: the bytes cannot form a valid frame (oversized or
//!   malformed length prefix, invalid UTF-8 in a text frame).
//! - [`EofError`]: the stream ended, either cleanly at a frame boundary or in
//!   the middle of a frame.
//! - [`CodecError`]: top-level enum wrapping both plus I/O errors.
//!
//! Every framing error is fatal to its connection. Unlike a protocol that can
//! skip a bad record, a stream whose frame boundary is unknown cannot be
//! resynchronised.

use std::io;

use thiserror::Error;

/// Wire-level errors raised while locating frame boundaries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// A frame exceeds the configured maximum size.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Declared (binary) or buffered (text) frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A binary length prefix is longer than five bytes or overflows.
    #[error("invalid frame length encoding")]
    InvalidLengthEncoding,

    /// A text frame is not valid UTF-8.
    #[error("text frame is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 {
        /// Length of the valid prefix.
        valid_up_to: usize,
    },

    /// A text payload contains the reserved record separator.
    #[error("text payload contains the reserved record separator at byte {index}")]
    ReservedByte {
        /// Offset of the offending byte.
        index: usize,
    },
}

/// End-of-stream conditions.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EofError {
    /// The peer closed the stream at a frame boundary.
    #[error("connection closed cleanly at frame boundary")]
    CleanClose,

    /// The stream ended after a complete length prefix but before the payload
    /// (or, for text, before the terminator).
    #[error("premature EOF: {bytes_received} bytes of an unfinished frame received")]
    MidFrame {
        /// Bytes buffered when the stream ended.
        bytes_received: usize,
    },

    /// The stream ended inside a binary length prefix.
    #[error("premature EOF during length prefix: {bytes_received} bytes received")]
    MidHeader {
        /// Prefix bytes buffered when the stream ended.
        bytes_received: usize,
    },
}

/// Top-level codec error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Malformed frame.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// End of stream.
    #[error("EOF: {0}")]
    Eof(#[from] EofError),
}

impl CodecError {
    /// Returns true if the peer closed the stream at a frame boundary.
    #[must_use]
    pub fn is_clean_close(&self) -> bool { matches!(self, Self::Eof(EofError::CleanClose)) }

    /// Short category name for logs and metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing",
            Self::Io(_) => "io",
            Self::Eof(_) => "eof",
        }
    }

    /// Recover a [`CodecError`] previously folded into an [`io::Error`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.downcast_ref::<FramingError>().is_some())
        {
            let kind = err.kind();
            return match err.into_inner().map(|inner| inner.downcast::<FramingError>()) {
                Some(Ok(framing)) => Self::Framing(*framing),
                _ => Self::Io(io::Error::from(kind)),
            };
        }
        Self::Io(err)
    }
}

impl From<CodecError> for io::Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => e,
            CodecError::Framing(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            CodecError::Eof(e) => io::Error::new(io::ErrorKind::UnexpectedEof, e),
        }
    }
}
