//! Logical hub messages shared by every hub protocol.

use serde_json::Value;

/// Numeric message type carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

impl MessageType {
    /// Map a wire code to a message type, if known.
    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            1 => Self::Invocation,
            2 => Self::StreamItem,
            3 => Self::Completion,
            4 => Self::StreamInvocation,
            5 => Self::CancelInvocation,
            6 => Self::Ping,
            7 => Self::Close,
            _ => return None,
        })
    }

    /// Wire code for this type.
    #[must_use]
    pub fn code(self) -> u8 { self as u8 }
}

/// Request to call `target` with `arguments`.
///
/// A `None` invocation id marks a fire-and-forget call that never receives a
/// completion.
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationMessage {
    pub invocation_id: Option<String>,
    pub target: String,
    pub arguments: Vec<Value>,
}

/// Request to call a streaming method. Streams always carry an id.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInvocationMessage {
    pub invocation_id: String,
    pub target: String,
    pub arguments: Vec<Value>,
}

/// One element of a streamed result.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamItemMessage {
    pub invocation_id: String,
    pub item: Value,
}

/// How an invocation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionOutcome {
    /// Finished without a value (streams, or methods with no result).
    Void,
    /// Finished with a value.
    Result(Value),
    /// Failed with a caller-visible message.
    Error(String),
}

/// Terminal reply to an invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionMessage {
    pub invocation_id: String,
    pub outcome: CompletionOutcome,
}

/// Request to stop producing items for a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelInvocationMessage {
    pub invocation_id: String,
}

/// Notice that the sender is closing the connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloseMessage {
    pub error: Option<String>,
    /// Whether the peer may reconnect after this close.
    pub allow_reconnect: bool,
}

/// Any message exchanged after the handshake.
#[derive(Clone, Debug, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    StreamInvocation(StreamInvocationMessage),
    StreamItem(StreamItemMessage),
    Completion(CompletionMessage),
    CancelInvocation(CancelInvocationMessage),
    Ping,
    Close(CloseMessage),
}

impl HubMessage {
    /// Wire type of this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Invocation(_) => MessageType::Invocation,
            Self::StreamInvocation(_) => MessageType::StreamInvocation,
            Self::StreamItem(_) => MessageType::StreamItem,
            Self::Completion(_) => MessageType::Completion,
            Self::CancelInvocation(_) => MessageType::CancelInvocation,
            Self::Ping => MessageType::Ping,
            Self::Close(_) => MessageType::Close,
        }
    }

    /// Invocation id carried by the message, if any.
    #[must_use]
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::Invocation(m) => m.invocation_id.as_deref(),
            Self::StreamInvocation(m) => Some(&m.invocation_id),
            Self::StreamItem(m) => Some(&m.invocation_id),
            Self::Completion(m) => Some(&m.invocation_id),
            Self::CancelInvocation(m) => Some(&m.invocation_id),
            Self::Ping | Self::Close(_) => None,
        }
    }

    /// Build an invocation.
    #[must_use]
    pub fn invocation(
        invocation_id: Option<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self::Invocation(InvocationMessage {
            invocation_id,
            target: target.into(),
            arguments,
        })
    }

    /// Build a stream invocation.
    #[must_use]
    pub fn stream_invocation(
        invocation_id: impl Into<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self::StreamInvocation(StreamInvocationMessage {
            invocation_id: invocation_id.into(),
            target: target.into(),
            arguments,
        })
    }

    /// Build a stream item.
    #[must_use]
    pub fn stream_item(invocation_id: impl Into<String>, item: Value) -> Self {
        Self::StreamItem(StreamItemMessage {
            invocation_id: invocation_id.into(),
            item,
        })
    }

    /// Build a completion carrying `outcome`.
    #[must_use]
    pub fn completion(invocation_id: impl Into<String>, outcome: CompletionOutcome) -> Self {
        Self::Completion(CompletionMessage {
            invocation_id: invocation_id.into(),
            outcome,
        })
    }

    /// Build an error completion.
    #[must_use]
    pub fn completion_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::completion(invocation_id, CompletionOutcome::Error(error.into()))
    }

    /// Build a cancellation request.
    #[must_use]
    pub fn cancel(invocation_id: impl Into<String>) -> Self {
        Self::CancelInvocation(CancelInvocationMessage {
            invocation_id: invocation_id.into(),
        })
    }

    /// Build a close message.
    #[must_use]
    pub fn close(error: Option<String>, allow_reconnect: bool) -> Self {
        Self::Close(CloseMessage {
            error,
            allow_reconnect,
        })
    }
}
