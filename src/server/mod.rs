//! Hosting a hub: connection bookkeeping, transports and the TCP accept loop.
//!
//! [`HubServer`] ties a [`ConnectionManager`] to a [`HubConnectionHandler`].
//! It exposes the entry points an HTTP layer calls (negotiate, start an SSE
//! or long polling transport, post, poll, disconnect) and, once bound, runs
//! an accept loop serving WebSocket connections directly over TCP.
//!
//! The server carries a typestate `S` indicating whether it is [`Unbound`]
//! or [`Bound`] to a listener. Only bound servers can run.

use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use bytes::Bytes;
use log::{info, warn};
use tokio::{
    io::AsyncWrite,
    net::TcpListener,
    signal,
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

mod accept;
mod backoff;
mod error;

use accept::accept_loop;
pub use backoff::BackoffConfig;
pub use error::ServerError;

use crate::{
    client::InProcessConnector,
    connection::{AbortReason, Connection},
    hub::HubConnectionHandler,
    manager::{ConnectionManager, ConnectionManagerOptions, NegotiateResponse, ShutdownReport},
    transport::{
        DuplexPipe,
        HttpTransportFeature,
        LongPollingHandle,
        LongPollingOptions,
        LongPollingTransport,
        PipeEnd,
        PollResult,
        SseTransport,
        TransferFormat,
        Transport,
        TransportKind,
        WebSocketTransport,
        run_transport,
    },
};

/// Server settings not owned by the hub or the connection manager.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Transports offered during negotiation, in order of preference.
    pub transports: Vec<TransportKind>,
    /// Framing of WebSocket messages accepted by the listener.
    pub websocket_format: TransferFormat,
    /// Frames buffered in each direction between a transport and its hub.
    pub pipe_capacity: usize,
    /// Settings for long polling transports.
    pub long_polling: LongPollingOptions,
    /// POST bodies buffered for an SSE connection.
    pub sse_post_capacity: usize,
    pub backoff: BackoffConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transports: TransportKind::ALL.to_vec(),
            websocket_format: TransferFormat::Text,
            pipe_capacity: 32,
            long_polling: LongPollingOptions::default(),
            sse_post_capacity: 16,
            backoff: BackoffConfig::default(),
        }
    }
}

/// State shared by the server handle and its accept loop.
#[derive(Clone, Debug)]
pub(crate) struct ServerCore {
    manager: ConnectionManager,
    handler: HubConnectionHandler,
    config: Arc<ServerConfig>,
}

impl ServerCore {
    fn connection(&self, token: &str) -> Result<Arc<Connection>, ServerError> {
        self.manager
            .try_get_connection(token)
            .ok_or(ServerError::UnknownConnection)
    }

    /// Attach `transport` to `connection` and run it with the hub until
    /// either side finishes.
    fn serve<T>(
        &self,
        connection: &Arc<Connection>,
        mut transport: T,
        format: TransferFormat,
    ) -> Result<(), ServerError>
    where
        T: Transport + 'static,
    {
        connection.attach_transport(transport.features(format))?;
        let (transport_end, app_end) = DuplexPipe::new(self.config.pipe_capacity).into_ends();
        let handler = self.handler.clone();
        let close_timeout = handler.options().close_timeout;
        let conn = Arc::clone(connection);
        self.manager.track(connection, async move {
            let stop = conn.stop_token();
            let (transported, served) = tokio::join!(
                run_transport(&mut transport, format, transport_end, stop, close_timeout),
                handler.run(Arc::clone(&conn), app_end),
            );
            if let Err(e) = transported {
                warn!("transport failed: connection_id={}, error={e}", conn.id());
                conn.abort(AbortReason::TransportFailed);
            }
            if let Err(e) = served {
                debug!(connection_id = %conn.id(), error = %e, "hub connection ended with an error");
            }
        });
        Ok(())
    }

    pub(crate) fn connect_pipe(&self) -> (Arc<Connection>, PipeEnd) {
        let connection = self.manager.create_connection(1);
        let (client_end, app_end) = DuplexPipe::new(self.config.pipe_capacity).into_ends();
        let handler = self.handler.clone();
        let conn = Arc::clone(&connection);
        self.manager.track(&connection, async move {
            if let Err(e) = handler.run(Arc::clone(&conn), app_end).await {
                debug!(connection_id = %conn.id(), error = %e, "hub connection ended with an error");
            }
        });
        (connection, client_end)
    }

    pub(crate) fn is_shutting_down(&self) -> bool { self.manager.shutdown_token().is_cancelled() }

    fn serve_websocket<S>(&self, transport: WebSocketTransport<S>) -> Result<(), ServerError>
    where
        S: tokio::io::AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = self.manager.create_connection(1);
        self.serve(&connection, transport, self.config.websocket_format)
    }
}

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    listener: Arc<TcpListener>,
}

/// Implemented by [`Unbound`] and [`Bound`].
pub trait ServerState: sealed::Sealed {}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

/// Hosts one hub.
#[derive(Debug)]
pub struct HubServer<S: ServerState = Unbound> {
    core: ServerCore,
    ready_tx: Option<oneshot::Sender<()>>,
    state: S,
}

impl HubServer<Unbound> {
    /// Server for `handler` with default settings.
    #[must_use]
    pub fn new(handler: HubConnectionHandler) -> Self {
        Self {
            core: ServerCore {
                manager: ConnectionManager::default(),
                handler,
                config: Arc::new(ServerConfig::default()),
            },
            ready_tx: None,
            state: Unbound,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.core.config = Arc::new(config);
        self
    }

    /// Replace the connection manager settings.
    #[must_use]
    pub fn with_manager_options(mut self, options: ConnectionManagerOptions) -> Self {
        self.core.manager = ConnectionManager::new(options);
        self
    }

    /// Notify `tx` once the accept loop is running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Bind to `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if binding or configuring the listener
    /// fails.
    pub fn bind(self, addr: SocketAddr) -> Result<HubServer<Bound>, ServerError> {
        let std_listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(std_listener)
    }

    /// Bind to an already open listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if configuring the listener fails.
    pub fn bind_existing_listener(
        self,
        std_listener: StdTcpListener,
    ) -> Result<HubServer<Bound>, ServerError> {
        std_listener
            .set_nonblocking(true)
            .map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::Bind)?;
        Ok(HubServer {
            core: self.core,
            ready_tx: self.ready_tx,
            state: Bound {
                listener: Arc::new(listener),
            },
        })
    }
}

impl<S: ServerState> HubServer<S> {
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager { &self.core.manager }

    #[must_use]
    pub fn handler(&self) -> &HubConnectionHandler { &self.core.handler }

    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.core.config }

    /// Answer a negotiate request from a client speaking `version`.
    pub fn negotiate(&self, version: u32) -> (Arc<Connection>, NegotiateResponse) {
        self.core
            .manager
            .negotiate(version, &self.core.config.transports)
    }

    /// Start the SSE transport for the connection behind `token`, streaming
    /// events into `writer`. Client messages arrive through
    /// [`HubServer::post`].
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownConnection`] for an unknown token and
    /// [`ServerError::Connection`] if a transport is already attached.
    pub fn start_sse<W>(&self, token: &str, writer: W) -> Result<(), ServerError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let connection = self.core.connection(token)?;
        let (transport, post) = SseTransport::new(writer, self.core.config.sse_post_capacity);
        self.core
            .serve(&connection, transport, TransferFormat::Text)?;
        connection.insert_feature(HttpTransportFeature::ServerSentEvents(post));
        Ok(())
    }

    /// Start the long polling transport for the connection behind `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownConnection`] for an unknown token and
    /// [`ServerError::Connection`] if a transport is already attached.
    pub fn start_long_polling(
        &self,
        token: &str,
        format: TransferFormat,
    ) -> Result<LongPollingHandle, ServerError> {
        let connection = self.core.connection(token)?;
        let (transport, handle) = LongPollingTransport::new(self.core.config.long_polling);
        self.core.serve(&connection, transport, format)?;
        connection.insert_feature(HttpTransportFeature::LongPolling(handle.clone()));
        Ok(handle)
    }

    /// Deliver a POSTed body to the connection behind `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownConnection`] for an unknown token,
    /// [`ServerError::NoHttpTransport`] if the connection does not accept
    /// POSTs and [`ServerError::Transport`] once its transport has finished.
    pub async fn post(&self, token: &str, body: Bytes) -> Result<(), ServerError> {
        let connection = self.core.connection(token)?;
        let feature = connection
            .feature::<HttpTransportFeature>()
            .ok_or(ServerError::NoHttpTransport)?;
        connection.touch();
        feature.post(body).await?;
        Ok(())
    }

    /// Wait for output for the long polling connection behind `token`.
    ///
    /// The connection counts as live for as long as the poll is parked.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownConnection`] for an unknown token and
    /// [`ServerError::NoHttpTransport`] if it is not long polling.
    pub async fn poll(&self, token: &str) -> Result<PollResult, ServerError> {
        let connection = self.core.connection(token)?;
        let feature = connection
            .feature::<HttpTransportFeature>()
            .ok_or(ServerError::NoHttpTransport)?;
        let handle = feature
            .long_polling()
            .ok_or(ServerError::NoHttpTransport)?
            .clone();
        let _alive = connection.hold_alive();
        Ok(handle.poll().await)
    }

    /// End the connection behind `token`. Returns `false` if it was unknown.
    pub fn disconnect(&self, token: &str) -> bool { self.core.manager.remove_connection(token) }

    /// Serve an already upgraded (or raw, to be upgraded) WebSocket stream.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Connection`] if the transport cannot be
    /// attached.
    pub fn serve_websocket<T>(&self, transport: WebSocketTransport<T>) -> Result<(), ServerError>
    where
        T: tokio::io::AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.core.serve_websocket(transport)
    }

    /// Open an in-process connection: the returned pipe end speaks directly
    /// to the hub with no transport in between.
    #[must_use]
    pub fn connect_pipe(&self) -> (Arc<Connection>, PipeEnd) { self.core.connect_pipe() }

    /// Connector handing [`crate::client::HubClient`]s in-process
    /// connections to this server.
    #[must_use]
    pub fn pipe_connector(&self) -> InProcessConnector { InProcessConnector::new(self.core.clone()) }

    /// Stop every connection, aborting those still running after the drain
    /// timeout.
    pub async fn shutdown(&self) -> ShutdownReport {
        let drain = self.core.manager.options().drain_timeout;
        self.core.manager.shutdown(drain).await
    }
}

impl HubServer<Bound> {
    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { self.state.listener.local_addr().ok() }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with back-off and never surface; the
    /// `Result` is kept for symmetry with binding.
    pub async fn run(self) -> Result<ShutdownReport, ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run until `shutdown` resolves, then drain connections.
    ///
    /// # Errors
    ///
    /// See [`HubServer::run`].
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<ShutdownReport, ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let HubServer {
            core,
            ready_tx,
            state: Bound { listener },
        } = self;
        let accept_shutdown = CancellationToken::new();
        let idle_scan = core.manager.spawn_idle_scan();
        let mut accept = tokio::spawn(accept_loop(
            listener,
            core.clone(),
            accept_shutdown.clone(),
            core.config.backoff,
        ));
        if let Some(tx) = ready_tx
            && tx.send(()).is_err()
        {
            warn!("failed to send readiness signal: receiver dropped");
        }

        tokio::select! {
            () = shutdown => accept_shutdown.cancel(),
            _ = &mut accept => {},
        }
        if let Err(e) = accept.await
            && e.is_panic()
        {
            warn!("accept loop panicked: error={e}");
        }
        let report = core
            .manager
            .shutdown(core.manager.options().drain_timeout)
            .await;
        let _ = idle_scan.await;
        info!(
            "server stopped: drained={}, aborted={}",
            report.drained, report.aborted
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
