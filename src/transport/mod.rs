//! Transports carrying framed bytes between a peer and the application.
//!
//! Every transport exposes the same shape: after [`Transport::start`] has
//! performed any transport specific setup, [`Transport::process`] pumps
//! frames between the network and a [`PipeEnd`] until either side closes.
//! The application never sees which transport it is talking through beyond
//! the [`TransportFeatures`] recorded on the connection.

use std::{fmt, io, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::MessageKind;

pub mod long_polling;
pub mod pipe;
pub mod sse;
pub mod websocket;

pub use long_polling::{LongPollingHandle, LongPollingOptions, LongPollingTransport, PollResult};
pub use pipe::{DuplexPipe, PipeEnd, PipeReceiver, PipeSender};
pub use sse::SseTransport;
pub use websocket::WebSocketTransport;

/// Framing a transport must preserve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFormat {
    Text,
    Binary,
}

impl TransferFormat {
    /// Frame encoding implied by this format.
    #[must_use]
    pub fn message_kind(self) -> MessageKind {
        match self {
            Self::Text => MessageKind::Text,
            Self::Binary => MessageKind::Binary,
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        })
    }
}

/// The available transports, named as they appear in negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    WebSockets,
    ServerSentEvents,
    LongPolling,
}

impl TransportKind {
    /// Every transport in order of preference.
    pub const ALL: [Self; 3] = [Self::WebSockets, Self::ServerSentEvents, Self::LongPolling];

    /// Wire name used in negotiate responses.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSockets => "WebSockets",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
        }
    }

    /// Transfer formats this transport can carry.
    #[must_use]
    pub fn transfer_formats(self) -> &'static [TransferFormat] {
        match self {
            Self::ServerSentEvents => &[TransferFormat::Text],
            Self::WebSockets | Self::LongPolling => &[TransferFormat::Text, TransferFormat::Binary],
        }
    }

    /// Whether `format` can be carried.
    #[must_use]
    pub fn supports(self, format: TransferFormat) -> bool {
        self.transfer_formats().contains(&format)
    }

    /// Whether the transport keeps the peer alive without hub pings.
    ///
    /// Long polling clients re-poll continuously, so their requests already
    /// prove liveness.
    #[must_use]
    pub fn has_inherent_keep_alive(self) -> bool { matches!(self, Self::LongPolling) }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Capabilities of the transport attached to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportFeatures {
    pub kind: TransportKind,
    pub format: TransferFormat,
    pub inherent_keep_alive: bool,
}

impl TransportFeatures {
    #[must_use]
    pub fn new(kind: TransportKind, format: TransferFormat) -> Self {
        Self {
            kind,
            format,
            inherent_keep_alive: kind.has_inherent_keep_alive(),
        }
    }
}

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport cannot carry the requested framing.
    #[error("{kind} does not support the {format} transfer format")]
    UnsupportedFormat {
        kind: TransportKind,
        format: TransferFormat,
    },
    /// `process` was called before a successful `start`.
    #[error("transport has not been started")]
    NotStarted,
    /// A WebSocket protocol or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// An I/O failure on a streaming response.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// More frames accumulated between long polls than allowed.
    #[error("long polling buffer exceeded {max} messages")]
    BufferOverflow { max: usize },
    /// The other end of the pipe or request channel is gone.
    #[error("transport closed")]
    Closed,
    /// The transport outlived its close grace period.
    #[error("transport did not close within {0:?}")]
    CloseTimeout(Duration),
}

/// Channel carrying request bodies posted by HTTP clients into a transport.
#[derive(Clone, Debug)]
pub struct PostHandle(mpsc::Sender<Bytes>);

impl PostHandle {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self(tx), rx)
    }

    /// Deliver one request body to the application.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the transport has finished.
    pub async fn post(&self, body: Bytes) -> Result<(), TransportError> {
        self.0.send(body).await.map_err(|_| TransportError::Closed)
    }
}

/// Hooks the HTTP layer uses to reach an HTTP-based transport, found on the
/// connection through its `?id=` token.
#[derive(Clone, Debug)]
pub enum HttpTransportFeature {
    ServerSentEvents(PostHandle),
    LongPolling(LongPollingHandle),
}

impl HttpTransportFeature {
    /// Deliver a POSTed body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] when the transport has finished.
    pub async fn post(&self, body: Bytes) -> Result<(), TransportError> {
        match self {
            Self::ServerSentEvents(post) => post.post(body).await,
            Self::LongPolling(handle) => handle.post(body).await,
        }
    }

    /// The poll handle when the transport is long polling.
    #[must_use]
    pub fn long_polling(&self) -> Option<&LongPollingHandle> {
        match self {
            Self::LongPolling(handle) => Some(handle),
            Self::ServerSentEvents(_) => None,
        }
    }
}

/// A bidirectional byte transport.
#[async_trait]
pub trait Transport: Send {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Whether `format` can be carried.
    fn supports(&self, format: TransferFormat) -> bool { self.kind().supports(format) }

    /// Features to record on the connection once started with `format`.
    fn features(&self, format: TransferFormat) -> TransportFeatures {
        TransportFeatures::new(self.kind(), format)
    }

    /// Transport specific setup, such as the WebSocket upgrade.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnsupportedFormat`] for a format the
    /// transport cannot carry, or the setup failure.
    async fn start(&mut self, format: TransferFormat) -> Result<(), TransportError>;

    /// Pump frames between the network and `pipe` until either side closes.
    ///
    /// Once `stop` fires the transport stops delivering input and keeps
    /// flushing output until the application drops its end of the pipe.
    ///
    /// # Errors
    ///
    /// Returns the first network failure.
    async fn process(&mut self, pipe: PipeEnd, stop: CancellationToken)
    -> Result<(), TransportError>;
}

/// Start `transport` and pump it until it finishes.
///
/// After `stop` fires the transport gets `close_timeout` to flush its output
/// before it is abandoned.
///
/// # Errors
///
/// Returns the transport's failure, or [`TransportError::CloseTimeout`] when
/// the grace period runs out.
pub async fn run_transport<T>(
    transport: &mut T,
    format: TransferFormat,
    pipe: PipeEnd,
    stop: CancellationToken,
    close_timeout: Duration,
) -> Result<(), TransportError>
where
    T: Transport + ?Sized,
{
    if !transport.supports(format) {
        return Err(TransportError::UnsupportedFormat {
            kind: transport.kind(),
            format,
        });
    }
    let kind = transport.kind();
    transport.start(format).await?;
    tracing::debug!(transport = %kind, %format, "transport started");
    let grace = async {
        stop.cancelled().await;
        tokio::time::sleep(close_timeout).await;
    };
    let result = tokio::select! {
        res = transport.process(pipe, stop.clone()) => res,
        () = grace => {
            tracing::warn!(transport = %kind, ?close_timeout, "transport close timed out");
            Err(TransportError::CloseTimeout(close_timeout))
        }
    };
    tracing::debug!(transport = %kind, ok = result.is_ok(), "transport finished");
    result
}
