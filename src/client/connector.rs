//! How a [`HubClient`](super::HubClient) reaches a server.

use std::{fmt, net::SocketAddr, time::Duration};

use async_trait::async_trait;
use log::warn;
use tokio::net::TcpStream;
use tokio_tungstenite::client_async;
use tokio_util::sync::CancellationToken;

use super::ClientError;
use crate::{
    server::ServerCore,
    transport::{DuplexPipe, PipeEnd, TransferFormat, TransportError, WebSocketTransport, run_transport},
};

/// An established connection, before the hub handshake.
#[derive(Debug)]
pub struct ClientConnection {
    /// Server-assigned id, when the connector learns it.
    pub connection_id: Option<String>,
    /// Frames to and from the server.
    pub pipe: PipeEnd,
}

/// Opens connections for a client; called once per (re)connect.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connect, carrying frames in `format`.
    ///
    /// # Errors
    ///
    /// Returns the failure to reach the server.
    async fn connect(&self, format: TransferFormat) -> Result<ClientConnection, ClientError>;
}

/// Connects over a WebSocket to a server's TCP listener.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    addr: SocketAddr,
    path: String,
    pipe_capacity: usize,
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            path: "/".into(),
            pipe_capacity: 32,
        }
    }

    /// Request path used in the upgrade request.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, format: TransferFormat) -> Result<ClientConnection, ClientError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(TransportError::from)?;
        let url = format!("ws://{}{}", self.addr, self.path);
        let (ws, _) = client_async(url, stream)
            .await
            .map_err(TransportError::from)?;
        let mut transport = WebSocketTransport::from_stream(ws);
        let (transport_end, client_end) = DuplexPipe::new(self.pipe_capacity).into_ends();
        let addr = self.addr;
        // Ends when the client drops its pipe end.
        tokio::spawn(async move {
            let stop = CancellationToken::new();
            if let Err(e) =
                run_transport(&mut transport, format, transport_end, stop, Duration::ZERO).await
            {
                warn!("client transport failed: error={e}, peer_addr={addr}");
            }
        });
        Ok(ClientConnection {
            connection_id: None,
            pipe: client_end,
        })
    }
}

/// Connects to a [`HubServer`](crate::server::HubServer) in the same
/// process through a pipe.
#[derive(Clone, Debug)]
pub struct InProcessConnector {
    core: ServerCore,
}

impl InProcessConnector {
    pub(crate) fn new(core: ServerCore) -> Self { Self { core } }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self, _format: TransferFormat) -> Result<ClientConnection, ClientError> {
        if self.core.is_shutting_down() {
            return Err(TransportError::Closed.into());
        }
        let (connection, pipe) = self.core.connect_pipe();
        Ok(ClientConnection {
            connection_id: Some(connection.id().to_string()),
            pipe,
        })
    }
}
