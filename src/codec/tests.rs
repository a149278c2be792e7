//! Unit tests for the text and binary frame codecs.
//!
//! Covers partial-frame handling, back-to-back parsing, oversized input and
//! EOF reporting, plus property tests that re-chunk encoded streams at
//! arbitrary boundaries.

use std::io;

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;

fn encode_all<C: FrameCodec>(codec: &C, payloads: &[Vec<u8>]) -> BytesMut {
    let mut buf = BytesMut::new();
    for payload in payloads {
        codec
            .write_message(payload, &mut buf)
            .expect("payload should be encodable");
    }
    buf
}

/// Feed `wire` to a decoder in the given chunk sizes, collecting payloads.
fn decode_in_chunks<C: FrameCodec>(codec: &C, wire: &[u8], chunks: &[usize]) -> Vec<Bytes> {
    let mut decoder = codec.decoder();
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    let mut offset = 0;
    let mut sizes = chunks.iter().copied().cycle();
    while offset < wire.len() {
        let size = sizes.next().unwrap_or(1).max(1).min(wire.len() - offset);
        buf.extend_from_slice(&wire[offset..offset + size]);
        offset += size;
        while let Some(message) = decoder.decode(&mut buf).expect("decode should succeed") {
            out.push(message.payload);
        }
    }
    assert!(buf.is_empty(), "no bytes should remain after the final frame");
    out
}

#[test]
fn text_parse_returns_incomplete_without_terminator() {
    let codec = TextFrameCodec::default();
    let buf = b"{\"protocol\":\"json\"";
    assert!(codec.try_parse_message(buf).expect("valid").is_none());
}

#[test]
fn text_parse_drains_back_to_back_messages() {
    let codec = TextFrameCodec::default();
    let mut buf: &[u8] = b"a\x1ebb\x1eccc\x1e";
    let mut seen = Vec::new();
    while let Some((message, used)) = codec.try_parse_message(buf).expect("valid") {
        assert_eq!(message.kind, MessageKind::Text);
        seen.push(message.payload);
        buf = &buf[used..];
    }
    assert_eq!(seen, vec![Bytes::from("a"), Bytes::from("bb"), Bytes::from("ccc")]);
    assert!(buf.is_empty());
}

#[test]
fn text_partial_frame_completes_after_more_bytes() {
    let codec = TextFrameCodec::default();
    let mut decoder = codec.decoder();
    let mut buf = BytesMut::from(&b"{\"type\":"[..]);
    assert!(decoder.decode(&mut buf).expect("valid").is_none());
    assert_eq!(buf.as_ref(), b"{\"type\":", "partial input must stay buffered");
    buf.extend_from_slice(b"6}\x1e");
    let message = decoder.decode(&mut buf).expect("valid").expect("complete");
    assert_eq!(message.payload.as_ref(), b"{\"type\":6}");
}

#[test]
fn text_rejects_invalid_utf8() {
    let codec = TextFrameCodec::default();
    let err = codec
        .try_parse_message(&[b'a', 0xff, RECORD_SEPARATOR])
        .expect_err("invalid utf-8");
    assert_eq!(err, FramingError::InvalidUtf8 { valid_up_to: 1 });
}

#[test]
fn text_rejects_unterminated_oversized_buffer() {
    let codec = TextFrameCodec::new(8);
    let err = codec
        .try_parse_message(b"0123456789")
        .expect_err("buffer exceeds limit");
    assert_eq!(err, FramingError::OversizedFrame { size: 10, max: 8 });
}

#[test]
fn text_write_refuses_reserved_byte() {
    let codec = TextFrameCodec::default();
    let mut buf = BytesMut::new();
    let err = codec
        .write_message(b"a\x1eb", &mut buf)
        .expect_err("separator inside payload");
    assert_eq!(err, FramingError::ReservedByte { index: 1 });
    assert!(buf.is_empty());
}

#[rstest]
#[case::one_prefix_byte(vec![0x05], 1)]
#[case::split_prefix(vec![0x80], 1)]
#[case::prefix_without_payload(vec![0x80, 0x01], 2)]
fn binary_partial_input_consumes_nothing(#[case] wire: Vec<u8>, #[case] len: usize) {
    let codec = BinaryFrameCodec::new(1024);
    let mut decoder = codec.decoder();
    let mut buf = BytesMut::from(&wire[..]);
    assert!(decoder.decode(&mut buf).expect("valid").is_none());
    assert_eq!(buf.len(), len);
}

#[test]
fn binary_rejects_declared_length_over_limit() {
    let codec = BinaryFrameCodec::new(64);
    let err = codec
        .try_parse_message(&[0x80, 0x01])
        .expect_err("128 > 64");
    assert_eq!(err, FramingError::OversizedFrame { size: 128, max: 64 });
}

#[test]
fn binary_decoder_surfaces_framing_errors_as_invalid_data() {
    let codec = BinaryFrameCodec::new(64);
    let mut decoder = codec.decoder();
    let mut buf = BytesMut::from(&[0xff, 0xff, 0xff, 0xff, 0x7f][..]);
    let err = decoder.decode(&mut buf).expect_err("invalid prefix");
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    assert!(matches!(
        CodecError::from_io(err),
        CodecError::Framing(FramingError::InvalidLengthEncoding)
    ));
}

#[rstest]
#[case::text_mid_frame(MessageKind::Text, vec![b'x'], EofError::MidFrame { bytes_received: 1 })]
#[case::binary_mid_header(MessageKind::Binary, vec![0x80], EofError::MidHeader { bytes_received: 1 })]
#[case::binary_mid_frame(MessageKind::Binary, vec![0x03, 1], EofError::MidFrame { bytes_received: 2 })]
fn decode_eof_reports_truncation(
    #[case] kind: MessageKind,
    #[case] wire: Vec<u8>,
    #[case] expected: EofError,
) {
    let mut decoder = AnyFrameCodec::for_kind(kind, 64).decoder();
    let mut buf = BytesMut::from(&wire[..]);
    let err = decoder.decode_eof(&mut buf).expect_err("truncated stream");
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    let inner = err
        .get_ref()
        .and_then(|e| e.downcast_ref::<EofError>())
        .copied();
    assert_eq!(inner, Some(expected));
}

#[test]
fn decode_eof_on_empty_buffer_is_clean() {
    let mut decoder = TextFrameCodec::default().decoder();
    let mut buf = BytesMut::new();
    assert!(decoder.decode_eof(&mut buf).expect("clean close").is_none());
}

#[test]
fn encoder_frames_messages() {
    let codec = TextFrameCodec::default();
    let mut encoder = codec.encoder();
    let mut buf = BytesMut::new();
    encoder
        .encode(Message::text("{}"), &mut buf)
        .expect("encodable");
    assert_eq!(buf.as_ref(), b"{}\x1e");
}

fn text_payload() -> impl Strategy<Value = Vec<u8>> {
    "[^\u{1e}]{0,64}".prop_map(String::into_bytes)
}

proptest! {
    #[test]
    fn text_frames_survive_any_chunking(
        payloads in prop::collection::vec(text_payload(), 1..8),
        chunks in prop::collection::vec(1usize..17, 1..8),
    ) {
        let codec = TextFrameCodec::new(1024);
        let wire = encode_all(&codec, &payloads);
        let decoded = decode_in_chunks(&codec, &wire, &chunks);
        let expected: Vec<Bytes> = payloads.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn binary_frames_survive_any_chunking(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..6),
        chunks in prop::collection::vec(1usize..9, 1..8),
    ) {
        let codec = BinaryFrameCodec::new(1024);
        let wire = encode_all(&codec, &payloads);
        let decoded = decode_in_chunks(&codec, &wire, &chunks);
        let expected: Vec<Bytes> = payloads.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(decoded, expected);
    }
}
