//! Hub protocols: turning [`HubMessage`]s into framed bytes and back.
//!
//! A [`HubProtocol`] only knows how to encode and decode a single payload.
//! [`ProtocolCodec`] pairs a protocol with the frame codec implied by its
//! transfer format, so callers can parse a byte buffer straight into hub
//! messages without caring whether the connection speaks JSON or bincode.

use std::{fmt, sync::Arc};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{
    codec::{AnyFrameCodec, FrameCodec, FramingError},
    transport::TransferFormat,
};

mod binary;
pub mod handshake;
mod json;
mod message;

pub use binary::{BINARY_PROTOCOL_NAME, BinaryHubProtocol};
pub use handshake::{HandshakeCodec, HandshakeRequest, HandshakeResponse};
pub use json::{JSON_PROTOCOL_NAME, JsonHubProtocol};
pub use message::{
    CancelInvocationMessage,
    CloseMessage,
    CompletionMessage,
    CompletionOutcome,
    HubMessage,
    InvocationMessage,
    MessageType,
    StreamInvocationMessage,
    StreamItemMessage,
};

/// Errors raised while decoding or encoding hub messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte stream could not be split into frames.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// A text payload was not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    /// A binary payload could not be decoded or encoded.
    #[error("invalid binary payload: {0}")]
    Binary(String),
    /// A required field was absent.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    /// A field carried a value of the wrong shape.
    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Encoding of hub messages into single payloads.
pub trait HubProtocol: Send + Sync + 'static {
    /// Name announced by clients in the handshake.
    fn name(&self) -> &'static str;

    /// Highest protocol version understood.
    fn version(&self) -> u32;

    /// Framing required on the transport.
    fn transfer_format(&self) -> TransferFormat;

    /// Whether a client requesting `version` can be served.
    fn is_version_supported(&self, version: u32) -> bool { version <= self.version() }

    /// Encode one message into an unframed payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the message cannot be serialised.
    fn encode_payload(&self, message: &HubMessage) -> Result<Vec<u8>, ProtocolError>;

    /// Decode one unframed payload.
    ///
    /// Returns `Ok(None)` for messages of a type this protocol does not know;
    /// such messages are skipped so newer peers stay compatible.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] when the payload is malformed.
    fn decode_payload(&self, payload: &[u8]) -> Result<Option<HubMessage>, ProtocolError>;
}

impl fmt::Debug for dyn HubProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubProtocol")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

/// A hub protocol bound to its framing.
#[derive(Clone, Debug)]
pub struct ProtocolCodec {
    protocol: Arc<dyn HubProtocol>,
    framing: AnyFrameCodec,
}

impl ProtocolCodec {
    /// Pair `protocol` with framing that rejects payloads above
    /// `max_message_size`.
    #[must_use]
    pub fn new(protocol: Arc<dyn HubProtocol>, max_message_size: usize) -> Self {
        let framing =
            AnyFrameCodec::for_kind(protocol.transfer_format().message_kind(), max_message_size);
        Self { protocol, framing }
    }

    /// The wrapped protocol.
    #[must_use]
    pub fn protocol(&self) -> &Arc<dyn HubProtocol> { &self.protocol }

    /// Parse the next message from `input`, advancing past every frame
    /// consumed.
    ///
    /// Frames carrying unknown message types are consumed and skipped.
    /// Returns `Ok(None)` once `input` holds no further complete frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] on malformed framing or payloads. The
    /// offending frame is consumed.
    pub fn try_parse_message(
        &self,
        input: &mut BytesMut,
    ) -> Result<Option<HubMessage>, ProtocolError> {
        while let Some(bounds) = self.framing.frame_bounds(input)? {
            let frame = input.split_to(bounds.consumed);
            if let Some(message) = self.protocol.decode_payload(&frame[bounds.payload])? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Append the framed encoding of `message` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the message cannot be encoded or
    /// framed.
    pub fn write_message(
        &self,
        message: &HubMessage,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let payload = self.protocol.encode_payload(message)?;
        self.framing.write_message(&payload, dst)?;
        Ok(())
    }

    /// Encode `message` as one standalone frame.
    ///
    /// # Errors
    ///
    /// See [`ProtocolCodec::write_message`].
    pub fn encode(&self, message: &HubMessage) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.write_message(message, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode every message in `frames`, which must hold whole frames only.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] on malformed input or a trailing partial
    /// frame.
    pub fn decode_all(&self, frames: &[u8]) -> Result<Vec<HubMessage>, ProtocolError> {
        let mut input = BytesMut::from(frames);
        let mut messages = Vec::new();
        while let Some(message) = self.try_parse_message(&mut input)? {
            messages.push(message);
        }
        if !input.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "frame",
                expected: "complete",
            });
        }
        Ok(messages)
    }
}

/// Protocols a server is willing to speak, looked up by handshake name.
#[derive(Clone, Debug)]
pub struct ProtocolRegistry {
    protocols: Vec<Arc<dyn HubProtocol>>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self {
            protocols: vec![
                Arc::new(JsonHubProtocol) as Arc<dyn HubProtocol>,
                Arc::new(BinaryHubProtocol),
            ],
        }
    }
}

impl ProtocolRegistry {
    /// A registry with no protocols.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            protocols: Vec::new(),
        }
    }

    /// Add `protocol`, replacing any protocol with the same name.
    #[must_use]
    pub fn with(mut self, protocol: Arc<dyn HubProtocol>) -> Self {
        self.protocols.retain(|p| p.name() != protocol.name());
        self.protocols.push(protocol);
        self
    }

    /// Resolve a protocol by its handshake name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn HubProtocol>> {
        self.protocols.iter().find(|p| p.name() == name).cloned()
    }

    /// Names of every registered protocol.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.protocols.iter().map(|p| p.name())
    }
}

#[cfg(test)]
mod tests;
