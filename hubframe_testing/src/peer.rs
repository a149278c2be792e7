//! Raw hub peer over an in-process pipe.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use hubframe::{
    codec::DEFAULT_MAX_MESSAGE_SIZE,
    connection::Connection,
    protocol::{
        HandshakeCodec,
        HandshakeRequest,
        HandshakeResponse,
        HubMessage,
        HubProtocol,
        ProtocolCodec,
        ProtocolError,
    },
    server::{HubServer, ServerState},
    transport::{PipeEnd, TransportError},
};
use serde_json::Value;

/// Client side of a hub connection that exchanges raw frames.
///
/// Reads are buffered: a pipe frame may carry several hub messages, or
/// the handshake response followed by messages.
#[derive(Debug)]
pub struct RawPeer {
    end: PipeEnd,
    connection: Arc<Connection>,
    codec: ProtocolCodec,
    buffer: BytesMut,
}

impl RawPeer {
    /// Open a pipe to `server` without sending anything.
    pub fn open<S: ServerState, P: HubProtocol>(server: &HubServer<S>, protocol: P) -> Self {
        let (connection, end) = server.connect_pipe();
        Self {
            end,
            connection,
            codec: ProtocolCodec::new(Arc::new(protocol), DEFAULT_MAX_MESSAGE_SIZE),
            buffer: BytesMut::new(),
        }
    }

    /// Open a pipe to `server` and complete the handshake for `protocol`.
    ///
    /// # Errors
    ///
    /// Fails if the pipe closes first or the server rejects the handshake.
    pub async fn connect<S: ServerState, P: HubProtocol>(
        server: &HubServer<S>,
        protocol: P,
    ) -> Result<Self, String> {
        let name = protocol.name();
        let mut peer = Self::open(server, protocol);
        peer.send_handshake(name, 1).await.map_err(|e| e.to_string())?;
        match peer.handshake_response().await {
            Some(response) if response.error.is_none() => Ok(peer),
            Some(response) => Err(format!("handshake rejected: {response:?}")),
            None => Err("pipe closed before the handshake response".into()),
        }
    }

    /// Server-side record of this connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> { &self.connection }

    /// Send a handshake request naming `protocol` and `version`.
    ///
    /// # Errors
    ///
    /// Fails if the pipe is closed.
    pub async fn send_handshake(&self, protocol: &str, version: u32) -> Result<(), TransportError> {
        let request = HandshakeRequest::new(protocol, version);
        let frame = HandshakeCodec::default()
            .encode_request(&request)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        self.end.send(frame).await
    }

    /// Wait for the handshake response.
    pub async fn handshake_response(&mut self) -> Option<HandshakeResponse> {
        let codec = HandshakeCodec::default();
        loop {
            match codec.try_parse_response(&mut self.buffer) {
                Ok(Some(response)) => return Some(response),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("unparseable handshake response: error={e}");
                    return None;
                }
            }
            if !self.fill().await {
                return None;
            }
        }
    }

    /// Send bytes exactly as given.
    ///
    /// # Errors
    ///
    /// Fails if the pipe is closed.
    pub async fn send_raw(&self, frame: impl Into<Bytes>) -> Result<(), TransportError> {
        self.end.send(frame.into()).await
    }

    /// Encode and send `message`.
    ///
    /// # Errors
    ///
    /// Fails if the message cannot be encoded or the pipe is closed.
    pub async fn send(&self, message: &HubMessage) -> Result<(), String> {
        let frame = self.codec.encode(message).map_err(|e: ProtocolError| e.to_string())?;
        self.end.send(frame).await.map_err(|e| e.to_string())
    }

    /// Invoke `target` expecting a completion for `id`.
    ///
    /// # Errors
    ///
    /// See [`RawPeer::send`].
    pub async fn invoke(&self, id: &str, target: &str, arguments: Vec<Value>) -> Result<(), String> {
        self.send(&HubMessage::invocation(Some(id.into()), target, arguments))
            .await
    }

    /// Invoke `target` without an invocation id.
    ///
    /// # Errors
    ///
    /// See [`RawPeer::send`].
    pub async fn notify(&self, target: &str, arguments: Vec<Value>) -> Result<(), String> {
        self.send(&HubMessage::invocation(None, target, arguments)).await
    }

    /// Start a streaming invocation of `target`.
    ///
    /// # Errors
    ///
    /// See [`RawPeer::send`].
    pub async fn stream(&self, id: &str, target: &str, arguments: Vec<Value>) -> Result<(), String> {
        self.send(&HubMessage::stream_invocation(id, target, arguments))
            .await
    }

    /// Next message, pings included. `None` once the server closes the pipe.
    ///
    /// # Panics
    ///
    /// Panics if the server writes bytes that do not decode.
    pub async fn next_raw(&mut self) -> Option<HubMessage> {
        loop {
            match self.codec.try_parse_message(&mut self.buffer) {
                Ok(Some(message)) => return Some(message),
                Ok(None) => {}
                Err(e) => panic!("server wrote an undecodable message: {e}"),
            }
            if !self.fill().await {
                return None;
            }
        }
    }

    /// Next message other than a ping.
    pub async fn next(&mut self) -> Option<HubMessage> {
        loop {
            match self.next_raw().await? {
                HubMessage::Ping => {}
                message => return Some(message),
            }
        }
    }

    /// Collect non-ping messages until the pipe closes.
    pub async fn drain(&mut self) -> Vec<HubMessage> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await {
            messages.push(message);
        }
        messages
    }

    async fn fill(&mut self) -> bool {
        match self.end.recv().await {
            Some(frame) => {
                self.buffer.extend_from_slice(&frame);
                true
            }
            None => false,
        }
    }
}
