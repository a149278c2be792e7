//! Tests for hub message encoding and the handshake.

use std::sync::Arc;

use bytes::BytesMut;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

#[fixture]
fn json_codec() -> ProtocolCodec { ProtocolCodec::new(Arc::new(JsonHubProtocol), 1024) }

#[fixture]
fn binary_codec() -> ProtocolCodec { ProtocolCodec::new(Arc::new(BinaryHubProtocol), 1024) }

fn payload_json(codec: &ProtocolCodec, message: &HubMessage) -> Value {
    let frame = codec.encode(message).expect("encodable");
    let (last, body) = frame.split_last().expect("non-empty frame");
    assert_eq!(*last, crate::codec::RECORD_SEPARATOR);
    serde_json::from_slice(body).expect("valid json")
}

#[rstest]
#[case::invocation(
    HubMessage::invocation(Some("1".into()), "Add", vec![json!(1), json!(2)]),
    json!({"type": 1, "invocationId": "1", "target": "Add", "arguments": [1, 2]})
)]
#[case::fire_and_forget(
    HubMessage::invocation(None, "Notify", vec![]),
    json!({"type": 1, "target": "Notify", "arguments": []})
)]
#[case::stream_item(
    HubMessage::stream_item("7", json!(42)),
    json!({"type": 2, "invocationId": "7", "item": 42})
)]
#[case::result(
    HubMessage::completion("1", CompletionOutcome::Result(json!(3))),
    json!({"type": 3, "invocationId": "1", "result": 3})
)]
#[case::null_result(
    HubMessage::completion("1", CompletionOutcome::Result(Value::Null)),
    json!({"type": 3, "invocationId": "1", "result": null})
)]
#[case::void(
    HubMessage::completion("1", CompletionOutcome::Void),
    json!({"type": 3, "invocationId": "1"})
)]
#[case::error(
    HubMessage::completion_error("1", "boom"),
    json!({"type": 3, "invocationId": "1", "error": "boom"})
)]
#[case::stream_invocation(
    HubMessage::stream_invocation("9", "Count", vec![json!(3)]),
    json!({"type": 4, "invocationId": "9", "target": "Count", "arguments": [3]})
)]
#[case::cancel(HubMessage::cancel("9"), json!({"type": 5, "invocationId": "9"}))]
#[case::ping(HubMessage::Ping, json!({"type": 6}))]
#[case::close(HubMessage::close(None, false), json!({"type": 7, "error": null}))]
#[case::close_reconnect(
    HubMessage::close(Some("bye".into()), true),
    json!({"type": 7, "error": "bye", "allowReconnect": true})
)]
fn json_wire_shapes(
    json_codec: ProtocolCodec,
    #[case] message: HubMessage,
    #[case] expected: Value,
) {
    assert_eq!(payload_json(&json_codec, &message), expected);
    let decoded = json_codec
        .decode_all(&json_codec.encode(&message).expect("encodable"))
        .expect("decodable");
    assert_eq!(decoded, vec![message]);
}

#[rstest]
fn json_distinguishes_void_from_null_result(json_codec: ProtocolCodec) {
    let messages = json_codec
        .decode_all(
            b"{\"type\":3,\"invocationId\":\"1\"}\x1e{\"type\":3,\"invocationId\":\"2\",\"result\":null}\x1e",
        )
        .expect("decodable");
    assert_eq!(
        messages,
        vec![
            HubMessage::completion("1", CompletionOutcome::Void),
            HubMessage::completion("2", CompletionOutcome::Result(Value::Null)),
        ]
    );
}

#[rstest]
#[case::missing_target(b"{\"type\":1,\"arguments\":[]}\x1e".as_slice(), "target")]
#[case::missing_arguments(b"{\"type\":1,\"target\":\"x\"}\x1e".as_slice(), "arguments")]
#[case::missing_stream_id(b"{\"type\":4,\"target\":\"x\",\"arguments\":[]}\x1e".as_slice(), "invocationId")]
#[case::missing_type(b"{\"target\":\"x\"}\x1e".as_slice(), "type")]
fn json_reports_missing_fields(
    json_codec: ProtocolCodec,
    #[case] wire: &[u8],
    #[case] field: &str,
) {
    let err = json_codec.decode_all(wire).expect_err("malformed");
    assert!(
        matches!(err, ProtocolError::MissingField(f) if f == field),
        "unexpected error: {err}"
    );
}

#[rstest]
fn json_rejects_completion_with_result_and_error(json_codec: ProtocolCodec) {
    let err = json_codec
        .decode_all(b"{\"type\":3,\"invocationId\":\"1\",\"result\":1,\"error\":\"x\"}\x1e")
        .expect_err("ambiguous completion");
    assert!(matches!(err, ProtocolError::InvalidField { field: "result", .. }));
}

#[rstest]
fn json_rejects_non_object_payloads(json_codec: ProtocolCodec) {
    let err = json_codec.decode_all(b"[1,2]\x1e").expect_err("array payload");
    assert!(matches!(err, ProtocolError::InvalidField { field: "message", .. }));
    let err = json_codec.decode_all(b"{not json\x1e").expect_err("bad json");
    assert!(matches!(err, ProtocolError::Json(_)));
}

#[rstest]
fn unknown_message_types_are_skipped(json_codec: ProtocolCodec) {
    let messages = json_codec
        .decode_all(b"{\"type\":99,\"x\":1}\x1e{\"type\":6}\x1e")
        .expect("decodable");
    assert_eq!(messages, vec![HubMessage::Ping]);
}

#[rstest]
fn parse_leaves_partial_frames_buffered(json_codec: ProtocolCodec) {
    let mut input = BytesMut::from(&b"{\"type\":6}\x1e{\"type\""[..]);
    assert_eq!(
        json_codec.try_parse_message(&mut input).expect("valid"),
        Some(HubMessage::Ping)
    );
    assert!(json_codec.try_parse_message(&mut input).expect("valid").is_none());
    assert_eq!(input.as_ref(), b"{\"type\"");
}

#[rstest]
fn binary_protocol_carries_every_message(binary_codec: ProtocolCodec) {
    let messages = vec![
        HubMessage::invocation(Some("1".into()), "Add", vec![json!(1), json!({"a": [true]})]),
        HubMessage::invocation(None, "Notify", vec![]),
        HubMessage::stream_invocation("2", "Count", vec![json!(5)]),
        HubMessage::stream_item("2", json!("item")),
        HubMessage::completion("1", CompletionOutcome::Result(Value::Null)),
        HubMessage::completion("2", CompletionOutcome::Void),
        HubMessage::completion_error("3", "boom"),
        HubMessage::cancel("2"),
        HubMessage::Ping,
        HubMessage::close(Some("bye".into()), true),
    ];
    let mut wire = BytesMut::new();
    for message in &messages {
        binary_codec.write_message(message, &mut wire).expect("encodable");
    }
    assert_eq!(binary_codec.decode_all(&wire).expect("decodable"), messages);
}

#[rstest]
fn binary_protocol_rejects_garbage(binary_codec: ProtocolCodec) {
    let err = binary_codec.decode_all(&[0x02, 0xff, 0xff]).expect_err("garbage");
    assert!(matches!(err, ProtocolError::Binary(_)));
}

#[test]
fn oversized_frames_are_rejected() {
    let codec = ProtocolCodec::new(Arc::new(JsonHubProtocol), 16);
    let message = HubMessage::invocation(None, "a-rather-long-target-name", vec![]);
    let wire = codec.encode(&message).expect("writing is not bounded");
    let err = codec.decode_all(&wire).expect_err("too large");
    assert!(matches!(
        err,
        ProtocolError::Framing(crate::codec::FramingError::OversizedFrame { max: 16, .. })
    ));
}

#[test]
fn registry_resolves_by_name() {
    let registry = ProtocolRegistry::default();
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["json", "bincode"]);
    let json = registry.resolve("json").expect("json registered");
    assert_eq!(json.transfer_format(), crate::transport::TransferFormat::Text);
    assert!(registry.resolve("messagepack").is_none());
    assert!(ProtocolRegistry::empty().resolve("json").is_none());
}

#[test]
fn version_support_accepts_older_clients() {
    assert!(JsonHubProtocol.is_version_supported(0));
    assert!(JsonHubProtocol.is_version_supported(1));
    assert!(!JsonHubProtocol.is_version_supported(2));
}

#[test]
fn handshake_request_round_trip_leaves_trailing_bytes() {
    let codec = HandshakeCodec::default();
    let mut input = BytesMut::new();
    codec
        .write_request(&HandshakeRequest::new("json", 1), &mut input)
        .expect("encodable");
    assert_eq!(input.as_ref(), b"{\"protocol\":\"json\",\"version\":1}\x1e");
    input.extend_from_slice(b"{\"type\":6}\x1e");
    let request = codec
        .try_parse_request(&mut input)
        .expect("valid")
        .expect("complete");
    assert_eq!(request, HandshakeRequest::new("json", 1));
    assert_eq!(input.as_ref(), b"{\"type\":6}\x1e");
}

#[rstest]
#[case::success(HandshakeResponse::success(), b"{}\x1e".as_slice())]
#[case::failure(
    HandshakeResponse::failure("nope"),
    b"{\"error\":\"nope\"}\x1e".as_slice()
)]
fn handshake_response_wire_shape(#[case] response: HandshakeResponse, #[case] wire: &[u8]) {
    let codec = HandshakeCodec::default();
    assert_eq!(codec.encode_response(&response).expect("encodable").as_ref(), wire);
    let mut input = BytesMut::from(wire);
    assert_eq!(
        codec.try_parse_response(&mut input).expect("valid"),
        Some(response)
    );
}

#[test]
fn handshake_request_requires_protocol() {
    let codec = HandshakeCodec::default();
    let mut input = BytesMut::from(&b"{\"type\":1,\"target\":\"x\"}\x1e"[..]);
    let err = codec.try_parse_request(&mut input).expect_err("not a handshake");
    assert!(matches!(err, ProtocolError::Json(_)));
}
