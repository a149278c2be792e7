//! Record-separator delimited text framing.

use bytes::{BufMut, BytesMut};

use super::{DEFAULT_MAX_MESSAGE_SIZE, FrameBounds, FrameCodec, FramingError, MessageKind};

/// ASCII record separator terminating every text frame.
///
/// JSON cannot contain an unescaped `0x1E`, so the byte never appears inside
/// a well-formed payload.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Codec for UTF-8 payloads terminated by [`RECORD_SEPARATOR`].
///
/// # Examples
///
/// ```
/// use hubframe::codec::{FrameCodec, TextFrameCodec};
///
/// let codec = TextFrameCodec::default();
/// let buf = b"{\"type\":6}\x1e{\"type\":6}\x1e";
/// let (first, used) = codec
///     .try_parse_message(buf)
///     .expect("valid frame")
///     .expect("complete frame");
/// assert_eq!(first.payload.as_ref(), b"{\"type\":6}");
/// assert_eq!(used, 11);
/// ```
#[derive(Clone, Debug)]
pub struct TextFrameCodec {
    max_message_size: usize,
}

impl TextFrameCodec {
    /// Codec accepting payloads up to `max_message_size` bytes.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: max_message_size.max(1),
        }
    }
}

impl Default for TextFrameCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_MESSAGE_SIZE) }
}

impl FrameCodec for TextFrameCodec {
    fn kind(&self) -> MessageKind { MessageKind::Text }

    fn max_message_size(&self) -> usize { self.max_message_size }

    fn frame_bounds(&self, buf: &[u8]) -> Result<Option<FrameBounds>, FramingError> {
        let Some(end) = buf.iter().position(|&b| b == RECORD_SEPARATOR) else {
            // Without a terminator the buffer can only grow; cap it so a peer
            // cannot make us buffer without bound.
            if buf.len() > self.max_message_size {
                return Err(FramingError::OversizedFrame {
                    size: buf.len(),
                    max: self.max_message_size,
                });
            }
            return Ok(None);
        };
        if end > self.max_message_size {
            return Err(FramingError::OversizedFrame {
                size: end,
                max: self.max_message_size,
            });
        }
        std::str::from_utf8(&buf[..end]).map_err(|e| FramingError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })?;
        Ok(Some(FrameBounds {
            payload: 0..end,
            consumed: end + 1,
        }))
    }

    fn write_message(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FramingError> {
        if let Some(index) = payload.iter().position(|&b| b == RECORD_SEPARATOR) {
            return Err(FramingError::ReservedByte { index });
        }
        dst.reserve(payload.len() + 1);
        dst.put_slice(payload);
        dst.put_u8(RECORD_SEPARATOR);
        Ok(())
    }
}
