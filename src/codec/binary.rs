//! Varint length-prefixed binary framing.
//!
//! The prefix stores the payload length seven bits at a time, least
//! significant group first. The high bit of each prefix byte signals that
//! another byte follows. At most [`MAX_LENGTH_PREFIX_BYTES`] are allowed,
//! which bounds lengths to [`MAX_BINARY_LENGTH`].

use bytes::{BufMut, BytesMut};

use super::{DEFAULT_MAX_MESSAGE_SIZE, FrameBounds, FrameCodec, FramingError, MessageKind};

/// Longest permitted length prefix.
pub const MAX_LENGTH_PREFIX_BYTES: usize = 5;

/// Largest length a prefix may declare (`i32::MAX`).
pub const MAX_BINARY_LENGTH: usize = 0x7fff_ffff;

/// The final prefix byte may only carry the top three bits of a 31-bit
/// length.
const MAX_FINAL_PREFIX_BYTE: u8 = 0x07;

/// Codec for varint length-prefixed payloads.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use hubframe::codec::{BinaryFrameCodec, FrameCodec};
///
/// let codec = BinaryFrameCodec::default();
/// let mut buf = BytesMut::new();
/// codec.write_message(&[7; 200], &mut buf).expect("encodable");
/// assert_eq!(&buf[..2], &[0xc8, 0x01]);
///
/// // One byte short of a full frame: nothing is consumed.
/// assert!(codec.try_parse_message(&buf[..201]).expect("valid").is_none());
/// ```
#[derive(Clone, Debug)]
pub struct BinaryFrameCodec {
    max_message_size: usize,
}

impl BinaryFrameCodec {
    /// Codec accepting payloads up to `max_message_size` bytes.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size: max_message_size.clamp(1, MAX_BINARY_LENGTH),
        }
    }
}

impl Default for BinaryFrameCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_MESSAGE_SIZE) }
}

/// Decode a length prefix from the start of `buf`.
///
/// Returns the declared length and the prefix size, or `None` if the prefix
/// continues past the end of `buf`.
fn read_length_prefix(buf: &[u8]) -> Result<Option<(usize, usize)>, FramingError> {
    let mut length = 0_usize;
    for (index, &byte) in buf.iter().take(MAX_LENGTH_PREFIX_BYTES).enumerate() {
        let last = index == MAX_LENGTH_PREFIX_BYTES - 1;
        if last && byte > MAX_FINAL_PREFIX_BYTE {
            return Err(FramingError::InvalidLengthEncoding);
        }
        length |= usize::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(Some((length, index + 1)));
        }
    }
    Ok(None)
}

fn write_length_prefix(mut length: usize, dst: &mut BytesMut) {
    loop {
        let low = u8::try_from(length & 0x7f).unwrap_or_default();
        length >>= 7;
        if length == 0 {
            dst.put_u8(low);
            return;
        }
        dst.put_u8(low | 0x80);
    }
}

impl FrameCodec for BinaryFrameCodec {
    fn kind(&self) -> MessageKind { MessageKind::Binary }

    fn max_message_size(&self) -> usize { self.max_message_size }

    fn frame_bounds(&self, buf: &[u8]) -> Result<Option<FrameBounds>, FramingError> {
        let Some((length, prefix)) = read_length_prefix(buf)? else {
            return Ok(None);
        };
        if length > self.max_message_size {
            return Err(FramingError::OversizedFrame {
                size: length,
                max: self.max_message_size,
            });
        }
        let end = prefix + length;
        if buf.len() < end {
            return Ok(None);
        }
        Ok(Some(FrameBounds {
            payload: prefix..end,
            consumed: end,
        }))
    }

    fn write_message(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FramingError> {
        if payload.len() > MAX_BINARY_LENGTH {
            return Err(FramingError::OversizedFrame {
                size: payload.len(),
                max: MAX_BINARY_LENGTH,
            });
        }
        dst.reserve(payload.len() + MAX_LENGTH_PREFIX_BYTES);
        write_length_prefix(payload.len(), dst);
        dst.put_slice(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, &[0x00])]
    #[case(127, &[0x7f])]
    #[case(128, &[0x80, 0x01])]
    #[case(16_384, &[0x80, 0x80, 0x01])]
    #[case(MAX_BINARY_LENGTH, &[0xff, 0xff, 0xff, 0xff, 0x07])]
    fn prefix_encoding_matches_wire_format(#[case] length: usize, #[case] expected: &[u8]) {
        let mut buf = BytesMut::new();
        write_length_prefix(length, &mut buf);
        assert_eq!(buf.as_ref(), expected);
        assert_eq!(
            read_length_prefix(&buf).expect("valid prefix"),
            Some((length, expected.len()))
        );
    }

    #[test]
    fn overlong_prefix_is_rejected() {
        let err = read_length_prefix(&[0xff, 0xff, 0xff, 0xff, 0x08]).expect_err("overflow");
        assert_eq!(err, FramingError::InvalidLengthEncoding);
        let err = read_length_prefix(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).expect_err("too long");
        assert_eq!(err, FramingError::InvalidLengthEncoding);
    }
}
