//! Compact binary hub protocol using bincode's serde mode.
//!
//! Message fields mirror the JSON protocol. Argument, item and result values
//! are embedded as JSON bytes so arbitrary [`serde_json::Value`]s survive the
//! trip without a self-describing binary format.

use bincode::config;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    CompletionOutcome,
    HubMessage,
    HubProtocol,
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
pub const BINARY_PROTOCOL_NAME: &str = "bincode";

/// The bincode hub protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryHubProtocol;

#[derive(Serialize, Deserialize)]
enum WireOutcome {
    Void,
    Result(Vec<u8>),
    Error(String),
}

#[derive(Serialize, Deserialize)]
enum WireMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Vec<u8>>,
    },
    StreamItem {
        invocation_id: String,
        item: Vec<u8>,
    },
    Completion {
        invocation_id: String,
        outcome: WireOutcome,
    },
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Vec<u8>>,
    },
    CancelInvocation {
        invocation_id: String,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
}

fn embed(value: &Value) -> Result<Vec<u8>, ProtocolError> { Ok(serde_json::to_vec(value)?) }

fn extract(bytes: &[u8]) -> Result<Value, ProtocolError> { Ok(serde_json::from_slice(bytes)?) }

fn embed_all(values: &[Value]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    values.iter().map(embed).collect()
}

fn extract_all(values: &[Vec<u8>]) -> Result<Vec<Value>, ProtocolError> {
    values.iter().map(|v| extract(v)).collect()
}

impl WireMessage {
    fn from_message(message: &HubMessage) -> Result<Self, ProtocolError> {
        Ok(match message {
            HubMessage::Invocation(m) => Self::Invocation {
                invocation_id: m.invocation_id.clone(),
                target: m.target.clone(),
                arguments: embed_all(&m.arguments)?,
            },
            HubMessage::StreamInvocation(m) => Self::StreamInvocation {
                invocation_id: m.invocation_id.clone(),
                target: m.target.clone(),
                arguments: embed_all(&m.arguments)?,
            },
            HubMessage::StreamItem(m) => Self::StreamItem {
                invocation_id: m.invocation_id.clone(),
                item: embed(&m.item)?,
            },
            HubMessage::Completion(m) => Self::Completion {
                invocation_id: m.invocation_id.clone(),
                outcome: match &m.outcome {
                    CompletionOutcome::Void => WireOutcome::Void,
                    CompletionOutcome::Result(value) => WireOutcome::Result(embed(value)?),
                    CompletionOutcome::Error(error) => WireOutcome::Error(error.clone()),
                },
            },
            HubMessage::CancelInvocation(m) => Self::CancelInvocation {
                invocation_id: m.invocation_id.clone(),
            },
            HubMessage::Ping => Self::Ping,
            HubMessage::Close(m) => Self::Close {
                error: m.error.clone(),
                allow_reconnect: m.allow_reconnect,
            },
        })
    }

    fn into_message(self) -> Result<HubMessage, ProtocolError> {
        Ok(match self {
            Self::Invocation {
                invocation_id,
                target,
                arguments,
            } => HubMessage::Invocation(InvocationMessage {
                invocation_id,
                target,
                arguments: extract_all(&arguments)?,
            }),
            Self::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => HubMessage::StreamInvocation(StreamInvocationMessage {
                invocation_id,
                target,
                arguments: extract_all(&arguments)?,
            }),
            Self::StreamItem {
                invocation_id,
                item,
            } => HubMessage::StreamItem(StreamItemMessage {
                invocation_id,
                item: extract(&item)?,
            }),
            Self::Completion {
                invocation_id,
                outcome,
            } => HubMessage::Completion(CompletionMessage {
                invocation_id,
                outcome: match outcome {
                    WireOutcome::Void => CompletionOutcome::Void,
                    WireOutcome::Result(bytes) => CompletionOutcome::Result(extract(&bytes)?),
                    WireOutcome::Error(error) => CompletionOutcome::Error(error),
                },
            }),
            Self::CancelInvocation { invocation_id } => {
                HubMessage::CancelInvocation(CancelInvocationMessage { invocation_id })
            }
            Self::Ping => HubMessage::Ping,
            Self::Close {
                error,
                allow_reconnect,
            } => HubMessage::Close(CloseMessage {
                error,
                allow_reconnect,
            }),
        })
    }
}

impl HubProtocol for BinaryHubProtocol {
    fn name(&self) -> &'static str { BINARY_PROTOCOL_NAME }

    fn version(&self) -> u32 { 1 }

    fn transfer_format(&self) -> TransferFormat { TransferFormat::Binary }

    fn encode_payload(&self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError> {
        let wire = WireMessage::from_message(message)?;
        bincode::serde::encode_to_vec(&wire, config::standard())
            .map_err(|e| ProtocolError::Binary(e.to_string()))
    }

    fn decode_payload(&self, payload: &[u8]) -> Result<Option<HubMessage>, ProtocolError> {
        let (wire, used): (WireMessage, usize) =
            bincode::serde::decode_from_slice(payload, config::standard())
                .map_err(|e| ProtocolError::Binary(e.to_string()))?;
        if used != payload.len() {
            return Err(ProtocolError::Binary(format!(
                "{} trailing bytes after message",
                payload.len() - used
            )));
        }
        wire.into_message().map(Some)
    }
}
