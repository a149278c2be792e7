//! Handshake exchanged before any hub message.
//!
//! The client opens with `{"protocol":"json","version":1}` and the server
//! answers `{}` on success or `{"error":"..."}` on failure. Both are JSON
//! framed as text regardless of the protocol being negotiated, because the
//! binary framing is not known to be acceptable until the handshake
//! completes.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::ProtocolError;
use crate::codec::{FrameCodec, TextFrameCodec};

/// Protocol selection sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl HandshakeRequest {
    #[must_use]
    pub fn new(protocol: impl Into<String>, version: u32) -> Self {
        Self {
            protocol: protocol.into(),
            version,
        }
    }
}

/// Server verdict on a [`HandshakeRequest`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Accepting response, `{}` on the wire.
    #[must_use]
    pub fn success() -> Self { Self::default() }

    /// Rejecting response carrying `error`.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
        }
    }
}

/// Reads and writes handshake frames.
#[derive(Clone, Debug, Default)]
pub struct HandshakeCodec {
    framing: TextFrameCodec,
}

impl HandshakeCodec {
    /// Codec rejecting handshake frames above `max_message_size`.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            framing: TextFrameCodec::new(max_message_size),
        }
    }

    fn write<T: Serialize>(&self, value: &T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(value)?;
        self.framing.write_message(&payload, dst)?;
        Ok(())
    }

    fn try_parse<T: DeserializeOwned>(
        &self,
        input: &mut BytesMut,
    ) -> Result<Option<T>, ProtocolError> {
        let Some(bounds) = self.framing.frame_bounds(input)? else {
            return Ok(None);
        };
        let frame = input.split_to(bounds.consumed);
        Ok(Some(serde_json::from_slice(&frame[bounds.payload])?))
    }

    /// Append a framed request to `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the request cannot be serialised.
    pub fn write_request(
        &self,
        request: &HandshakeRequest,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        self.write(request, dst)
    }

    /// Append a framed response to `dst`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the response cannot be serialised.
    pub fn write_response(
        &self,
        response: &HandshakeResponse,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        self.write(response, dst)
    }

    /// Encode `response` as one standalone frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the response cannot be serialised.
    pub fn encode_response(&self, response: &HandshakeResponse) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.write_response(response, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode `request` as one standalone frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the request cannot be serialised.
    pub fn encode_request(&self, request: &HandshakeRequest) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.write_request(request, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse a request from the front of `input`.
    ///
    /// Bytes following the request stay in `input`; they belong to the
    /// negotiated protocol.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the first frame is not a valid request.
    pub fn try_parse_request(
        &self,
        input: &mut BytesMut,
    ) -> Result<Option<HandshakeRequest>, ProtocolError> {
        self.try_parse(input)
    }

    /// Parse a response from the front of `input`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the first frame is not a valid
    /// response.
    pub fn try_parse_response(
        &self,
        input: &mut BytesMut,
    ) -> Result<Option<HandshakeResponse>, ProtocolError> {
        self.try_parse(input)
    }
}
