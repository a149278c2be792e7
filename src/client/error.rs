//! Error types for hub client operations.

use thiserror::Error;

use super::HubConnectionState;
use crate::{protocol::ProtocolError, transport::TransportError};

/// Errors emitted by [`crate::client::HubClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No connection is currently established.
    #[error("the client is not connected")]
    NotConnected,
    /// `start` was called while the client was not stopped.
    #[error("cannot start a client in the {0:?} state")]
    InvalidState(HubConnectionState),
    /// The connection went away before the invocation completed.
    #[error("connection lost before the invocation completed")]
    ConnectionLost,
    /// The server refused the handshake.
    #[error("handshake rejected: {0}")]
    Handshake(String),
    /// The server completed the invocation with an error.
    #[error("{0}")]
    Invocation(String),
    /// The server sent a message the client cannot accept.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Inbound bytes could not be decoded.
    #[error("malformed input: {0}")]
    Format(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The named clock expired.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// Arguments or results could not be converted.
    #[error("failed to convert value: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the connection may be re-established after this error.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Transport(_) | Self::Timeout(_)
        )
    }
}
