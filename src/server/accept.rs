//! Accept loop turning TCP connections into WebSocket hub connections.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use super::{BackoffConfig, ServerCore};
use crate::transport::WebSocketTransport;

/// Source of incoming connections consumed by the accept loop.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Accept connections until `shutdown` fires, pausing after failures.
pub(crate) async fn accept_loop<L>(
    listener: Arc<L>,
    core: ServerCore,
    shutdown: CancellationToken,
    backoff: BackoffConfig,
) where
    L: AcceptListener + 'static,
{
    let mut failures = 0_u32;
    loop {
        let accepted = select! {
            biased;

            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                failures = 0;
                if let Err(e) = core.serve_websocket(WebSocketTransport::accept(stream)) {
                    warn!("failed to serve connection: error={e}, peer_addr={peer_addr}");
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = backoff.delay_for(failures);
                let local_addr = listener.local_addr().ok();
                warn!("accept failed: error={e}, local_addr={local_addr:?}, retry_in={delay:?}");
                select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    () = sleep(delay) => {}
                }
            }
        }
    }
    debug!("accept loop stopped");
}
