//! Top-level error taxonomy.
//!
//! Every failure in a hub connection falls into one of five classes, each
//! with a fixed consequence:
//!
//! | class                | consequence                                       |
//! |----------------------|---------------------------------------------------|
//! | `Format`             | connection closed                                 |
//! | `ProtocolViolation`  | `Close{error}` sent, connection closed            |
//! | `Handler`            | one invocation fails with `Completion{error}`     |
//! | `Transport`          | connection torn down; clients may reconnect       |
//! | `Timeout`            | treated like `Transport`                          |
//! | `Config`             | connection refused before it starts               |

use std::time::Duration;

use thiserror::Error;

use crate::{
    codec::FramingError,
    protocol::ProtocolError,
    push::PushConfigError,
    transport::TransportError,
};

/// Classified hub failure.
#[derive(Debug, Error)]
pub enum HubError {
    /// Bytes could not be decoded into hub messages.
    #[error("malformed input: {0}")]
    Format(#[from] ProtocolError),
    /// A well-formed message arrived that is not allowed in the current
    /// state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A hub method failed.
    #[error("handler failed: {0}")]
    Handler(String),
    /// The underlying transport failed or closed unexpectedly.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// The peer went silent for too long.
    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },
    /// Invalid connection settings.
    #[error("invalid configuration: {0}")]
    Config(#[from] PushConfigError),
}

impl From<FramingError> for HubError {
    fn from(err: FramingError) -> Self { Self::Format(ProtocolError::Framing(err)) }
}

impl HubError {
    /// Whether the connection cannot continue after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool { !matches!(self, Self::Handler(_)) }

    /// Whether a client should try to reconnect after this error.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }

    /// Short label used for logging and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Format(_) => "format",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Handler(_) => "handler",
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Config(_) => "config",
        }
    }
}
