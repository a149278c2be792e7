//! Message framing for hub transports.
//!
//! Codecs split a raw byte stream into discrete [`Message`]s and wrap
//! outgoing payloads for transmission. Two schemes are provided:
//!
//! - [`TextFrameCodec`]: UTF-8 payloads terminated by the ASCII record
//!   separator ([`RECORD_SEPARATOR`]).
//! - [`BinaryFrameCodec`]: payloads preceded by a 7-bit variable-length
//!   integer carrying the payload length.
//!
//! Parsing never consumes a partial frame. When the buffer holds less than
//! one complete frame the codec reports "incomplete" and leaves the input
//! untouched so the caller can append more bytes and try again.
//!
//! # Error Handling
//!
//! Malformed input surfaces as a [`FramingError`]. Framing errors are fatal
//! to the connection: once a frame boundary has been lost the rest of the
//! stream cannot be trusted. See the [`error`] module for the taxonomy.

use std::{io, ops::Range};

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

mod binary;
pub mod error;
mod text;

pub use binary::{BinaryFrameCodec, MAX_BINARY_LENGTH, MAX_LENGTH_PREFIX_BYTES};
pub use error::{CodecError, EofError, FramingError};
pub use text::{RECORD_SEPARATOR, TextFrameCodec};

/// Default largest inbound message accepted by either codec (32 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024;

/// Payload encoding carried by a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 text, delimited by [`RECORD_SEPARATOR`].
    Text,
    /// Arbitrary bytes, length-prefixed.
    Binary,
}

/// A single framed unit of communication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Payload bytes without framing.
    pub payload: Bytes,
    /// Encoding of `payload`.
    pub kind: MessageKind,
    /// `false` when more continuation data belongs to the same logical
    /// message.
    pub end_of_message: bool,
}

impl Message {
    /// Build a complete text message.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            kind: MessageKind::Text,
            end_of_message: true,
        }
    }

    /// Build a complete binary message.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            kind: MessageKind::Binary,
            end_of_message: true,
        }
    }
}

/// Location of one complete frame inside a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBounds {
    /// Byte range of the payload.
    pub payload: Range<usize>,
    /// Total bytes occupied by the frame, including framing overhead.
    pub consumed: usize,
}

/// Pluggable framing scheme.
///
/// Implementors only locate frame boundaries and emit framing overhead; the
/// provided methods build Tokio decoders and encoders on top of that.
pub trait FrameCodec: Send + Sync + Clone + 'static {
    /// Encoding of the messages produced by this codec.
    fn kind(&self) -> MessageKind;

    /// Largest payload accepted when parsing.
    fn max_message_size(&self) -> usize;

    /// Locate the first complete frame in `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet contain a whole frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] when the bytes cannot form a valid frame.
    fn frame_bounds(&self, buf: &[u8]) -> Result<Option<FrameBounds>, FramingError>;

    /// Append `payload` to `dst` using this codec's framing.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] if the payload cannot be represented.
    fn write_message(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FramingError>;

    /// Parse the first complete message in `buf`.
    ///
    /// On success the message is returned together with the number of bytes
    /// it occupied; the caller advances its buffer by that amount. `buf` is
    /// never modified.
    ///
    /// # Errors
    ///
    /// Returns a [`FramingError`] when the bytes cannot form a valid frame.
    fn try_parse_message(&self, buf: &[u8]) -> Result<Option<(Message, usize)>, FramingError> {
        Ok(self.frame_bounds(buf)?.map(|bounds| {
            let message = Message {
                payload: Bytes::copy_from_slice(&buf[bounds.payload]),
                kind: self.kind(),
                end_of_message: true,
            };
            (message, bounds.consumed)
        }))
    }

    /// Create a Tokio decoder for this codec.
    fn decoder(&self) -> FrameDecoder<Self> {
        FrameDecoder {
            codec: self.clone(),
        }
    }

    /// Create a Tokio encoder for this codec.
    fn encoder(&self) -> FrameEncoder<Self> {
        FrameEncoder {
            codec: self.clone(),
        }
    }
}

/// Tokio [`Decoder`] splitting frames out of a read buffer without copying.
#[derive(Clone, Debug)]
pub struct FrameDecoder<C> {
    codec: C,
}

impl<C: FrameCodec> Decoder for FrameDecoder<C> {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(bounds) = self.codec.frame_bounds(src).map_err(CodecError::from)? else {
            return Ok(None);
        };
        let frame = src.split_to(bounds.consumed).freeze();
        Ok(Some(Message {
            payload: frame.slice(bounds.payload),
            kind: self.codec.kind(),
            end_of_message: true,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => {
                let eof = match self.codec.kind() {
                    MessageKind::Text => EofError::MidFrame {
                        bytes_received: src.len(),
                    },
                    MessageKind::Binary if src.len() < MAX_LENGTH_PREFIX_BYTES
                        && src.iter().all(|b| b & 0x80 != 0) =>
                    {
                        EofError::MidHeader {
                            bytes_received: src.len(),
                        }
                    }
                    MessageKind::Binary => EofError::MidFrame {
                        bytes_received: src.len(),
                    },
                };
                tracing::debug!(
                    remaining = src.len(),
                    error = %eof,
                    "stream ended inside a frame"
                );
                src.advance(src.len());
                Err(CodecError::Eof(eof).into())
            }
        }
    }
}

/// Tokio [`Encoder`] wrapping payloads with a codec's framing.
#[derive(Clone, Debug)]
pub struct FrameEncoder<C> {
    codec: C,
}

impl<C: FrameCodec> Encoder<Bytes> for FrameEncoder<C> {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.codec
            .write_message(&item, dst)
            .map_err(|e| CodecError::from(e).into())
    }
}

impl<C: FrameCodec> Encoder<Message> for FrameEncoder<C> {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<Bytes>::encode(self, item.payload, dst)
    }
}

/// Either of the built-in codecs, selected at runtime from a transfer format.
#[derive(Clone, Debug)]
pub enum AnyFrameCodec {
    /// Record-separator delimited text.
    Text(TextFrameCodec),
    /// Varint length-prefixed binary.
    Binary(BinaryFrameCodec),
}

impl AnyFrameCodec {
    /// Codec for `kind` accepting messages up to `max_message_size` bytes.
    #[must_use]
    pub fn for_kind(kind: MessageKind, max_message_size: usize) -> Self {
        match kind {
            MessageKind::Text => Self::Text(TextFrameCodec::new(max_message_size)),
            MessageKind::Binary => Self::Binary(BinaryFrameCodec::new(max_message_size)),
        }
    }
}

impl FrameCodec for AnyFrameCodec {
    fn kind(&self) -> MessageKind {
        match self {
            Self::Text(codec) => codec.kind(),
            Self::Binary(codec) => codec.kind(),
        }
    }

    fn max_message_size(&self) -> usize {
        match self {
            Self::Text(codec) => codec.max_message_size(),
            Self::Binary(codec) => codec.max_message_size(),
        }
    }

    fn frame_bounds(&self, buf: &[u8]) -> Result<Option<FrameBounds>, FramingError> {
        match self {
            Self::Text(codec) => codec.frame_bounds(buf),
            Self::Binary(codec) => codec.frame_bounds(buf),
        }
    }

    fn write_message(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FramingError> {
        match self {
            Self::Text(codec) => codec.write_message(payload, dst),
            Self::Binary(codec) => codec.write_message(payload, dst),
        }
    }
}

#[cfg(test)]
mod tests;
