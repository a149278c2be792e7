//! JSON hub protocol carried over record-separator text frames.
//!
//! Wire shapes:
//!
//! ```text
//! {"type":1,"invocationId":"1","target":"Add","arguments":[1,2]}
//! {"type":2,"invocationId":"1","item":42}
//! {"type":3,"invocationId":"1","result":3}
//! {"type":3,"invocationId":"1","error":"boom"}
//! {"type":4,"invocationId":"1","target":"Count","arguments":[]}
//! {"type":5,"invocationId":"1"}
//! {"type":6}
//! {"type":7,"error":null}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use super::{
    CompletionOutcome,
    HubMessage,
    HubProtocol,
    MessageType,
    ProtocolError,
    message::{
        CancelInvocationMessage,
        CloseMessage,
        CompletionMessage,
        InvocationMessage,
        StreamInvocationMessage,
        StreamItemMessage,
    },
};
use crate::transport::TransferFormat;

/// Protocol name announced in the handshake.
pub const JSON_PROTOCOL_NAME: &str = "json";

/// The JSON hub protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonHubProtocol;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationWire<'a> {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation_id: Option<&'a str>,
    target: &'a str,
    arguments: &'a [Value],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamItemWire<'a> {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: &'a str,
    item: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionWire<'a> {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelWire<'a> {
    #[serde(rename = "type")]
    kind: u8,
    invocation_id: &'a str,
}

#[derive(Serialize)]
struct PingWire {
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseWire<'a> {
    #[serde(rename = "type")]
    kind: u8,
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    allow_reconnect: bool,
}

fn to_vec<T: Serialize>(wire: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(wire).map_err(ProtocolError::from)
}

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &'static str { JSON_PROTOCOL_NAME }

    fn version(&self) -> u32 { 1 }

    fn transfer_format(&self) -> TransferFormat { TransferFormat::Text }

    fn encode_payload(&self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
        let kind = message.message_type().code();
        match message {
            HubMessage::Invocation(m) => to_vec(&InvocationWire {
                kind,
                invocation_id: m.invocation_id.as_deref(),
                target: &m.target,
                arguments: &m.arguments,
            }),
            HubMessage::StreamInvocation(m) => to_vec(&InvocationWire {
                kind,
                invocation_id: Some(&m.invocation_id),
                target: &m.target,
                arguments: &m.arguments,
            }),
            HubMessage::StreamItem(m) => to_vec(&StreamItemWire {
                kind,
                invocation_id: &m.invocation_id,
                item: &m.item,
            }),
            HubMessage::Completion(m) => {
                let (result, error) = match &m.outcome {
                    CompletionOutcome::Void => (None, None),
                    CompletionOutcome::Result(value) => (Some(value), None),
                    CompletionOutcome::Error(error) => (None, Some(error.as_str())),
                };
                to_vec(&CompletionWire {
                    kind,
                    invocation_id: &m.invocation_id,
                    result,
                    error,
                })
            }
            HubMessage::CancelInvocation(m) => to_vec(&CancelWire {
                kind,
                invocation_id: &m.invocation_id,
            }),
            HubMessage::Ping => to_vec(&PingWire { kind }),
            HubMessage::Close(m) => to_vec(&CloseWire {
                kind,
                error: m.error.as_deref(),
                allow_reconnect: m.allow_reconnect,
            }),
        }
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<Option<HubMessage>, ProtocolError> {
        let Value::Object(mut fields) = serde_json::from_slice::<Value>(payload)? else {
            return Err(ProtocolError::InvalidField {
                field: "message",
                expected: "a JSON object",
            });
        };
        let code = fields
            .get("type")
            .ok_or(ProtocolError::MissingField("type"))?
            .as_u64()
            .ok_or(ProtocolError::InvalidField {
                field: "type",
                expected: "an unsigned integer",
            })?;
        let Some(kind) = MessageType::from_code(code) else {
            tracing::debug!(code, "ignoring message of unknown type");
            return Ok(None);
        };
        let message = match kind {
            MessageType::Invocation => HubMessage::Invocation(InvocationMessage {
                invocation_id: optional_string(&mut fields, "invocationId")?,
                target: required_string(&mut fields, "target")?,
                arguments: arguments(&mut fields)?,
            }),
            MessageType::StreamInvocation => {
                HubMessage::StreamInvocation(StreamInvocationMessage {
                    invocation_id: required_string(&mut fields, "invocationId")?,
                    target: required_string(&mut fields, "target")?,
                    arguments: arguments(&mut fields)?,
                })
            }
            MessageType::StreamItem => HubMessage::StreamItem(StreamItemMessage {
                invocation_id: required_string(&mut fields, "invocationId")?,
                item: fields
                    .remove("item")
                    .ok_or(ProtocolError::MissingField("item"))?,
            }),
            MessageType::Completion => {
                let invocation_id = required_string(&mut fields, "invocationId")?;
                let error = optional_string(&mut fields, "error")?;
                let result = fields.remove("result");
                let outcome = match (result, error) {
                    (Some(_), Some(_)) => {
                        return Err(ProtocolError::InvalidField {
                            field: "result",
                            expected: "either a result or an error, not both",
                        });
                    }
                    (None, Some(error)) => CompletionOutcome::Error(error),
                    (Some(value), None) => CompletionOutcome::Result(value),
                    (None, None) => CompletionOutcome::Void,
                };
                HubMessage::Completion(CompletionMessage {
                    invocation_id,
                    outcome,
                })
            }
            MessageType::CancelInvocation => {
                HubMessage::CancelInvocation(CancelInvocationMessage {
                    invocation_id: required_string(&mut fields, "invocationId")?,
                })
            }
            MessageType::Ping => HubMessage::Ping,
            MessageType::Close => HubMessage::Close(CloseMessage {
                error: optional_string(&mut fields, "error")?,
                allow_reconnect: match fields.remove("allowReconnect") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(flag)) => flag,
                    Some(_) => {
                        return Err(ProtocolError::InvalidField {
                            field: "allowReconnect",
                            expected: "a boolean",
                        });
                    }
                },
            }),
        };
        Ok(Some(message))
    }
}

fn optional_string(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ProtocolError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(ProtocolError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn required_string(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    optional_string(fields, field)?.ok_or(ProtocolError::MissingField(field))
}

fn arguments(fields: &mut Map<String, Value>) -> Result<Vec<Value>, ProtocolError> {
    match fields.remove("arguments") {
        Some(Value::Array(arguments)) => Ok(arguments),
        Some(_) => Err(ProtocolError::InvalidField {
            field: "arguments",
            expected: "an array",
        }),
        None => Err(ProtocolError::MissingField("arguments")),
    }
}
