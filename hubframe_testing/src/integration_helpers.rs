//! Shared helpers for integration testing hub servers.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    time::Duration,
};

use hubframe::{
    hub::{Hub, HubConnectionHandler},
    server::HubServer,
};

/// Result type used by integration tests that propagate errors with `?`.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Create a TCP listener bound to a free local port.
///
/// # Errors
///
/// Returns any IO error encountered while binding to an ephemeral localhost
/// port.
pub fn unused_listener() -> std::io::Result<StdTcpListener> {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr)
}

/// Unbound server hosting `hub` with default options.
#[must_use]
pub fn hub_server(hub: Hub) -> HubServer { HubServer::new(HubConnectionHandler::new(hub)) }

/// Poll `condition` every few milliseconds until it holds.
///
/// # Errors
///
/// Returns an error naming `what` if `condition` still fails after
/// `timeout`.
pub async fn wait_until<F>(what: &str, timeout: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.map_err(|_| format!("timed out waiting for {what}"))
}
