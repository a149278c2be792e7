//! Demo server hosting a small chat hub over WebSockets.

mod cli;

use std::time::Duration;

use clap::Parser;
use futures::Stream;
use hubframe::{
    hub::{HandlerResult, Hub, HubCallContext, HubConnectionHandler, HubOptions},
    manager::ConnectionManagerOptions,
    server::{HubServer, ServerConfig},
    transport::TransferFormat,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

async fn send(ctx: HubCallContext, (user, message): (String, String)) -> HandlerResult<()> {
    ctx.clients()
        .broadcast("ReceiveMessage", &[json!(user), json!(message)]);
    Ok(())
}

async fn echo(_ctx: HubCallContext, (message,): (String,)) -> HandlerResult<String> { Ok(message) }

/// Counts down to zero, one number per second.
fn countdown(_ctx: HubCallContext, (from,): (u32,)) -> impl Stream<Item = HandlerResult<u32>> {
    futures::stream::unfold(Some(from), move |next| async move {
        let n = next?;
        if n < from {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Some((Ok(n), n.checked_sub(1)))
    })
}

fn build_hub() -> Result<Hub, hubframe::hub::HubBuildError> {
    Ok(Hub::builder()
        .method("SendMessage", send)?
        .method("Echo", echo)?
        .stream("Countdown", countdown)?
        .on_connected(|ctx| async move {
            tracing::info!(connection_id = %ctx.connection_id(), "chat member joined");
        })
        .build())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        hubframe::metrics::install_prometheus(addr)?;
        tracing::info!(%addr, "serving metrics");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        tracing::warn!("built without the metrics feature; --metrics-addr ignored");
    }

    let options = HubOptions::default()
        .keep_alive_interval(cli.keep_alive)
        .client_timeout_interval(cli.client_timeout)
        .handshake_timeout(cli.handshake_timeout)
        .enable_detailed_errors(cli.detailed_errors);
    let handler = HubConnectionHandler::new(build_hub()?).with_options(options);
    let config = ServerConfig {
        websocket_format: if cli.binary {
            TransferFormat::Binary
        } else {
            TransferFormat::Text
        },
        ..ServerConfig::default()
    };
    let server = HubServer::new(handler)
        .with_config(config)
        .with_manager_options(ConnectionManagerOptions::default().drain_timeout(cli.drain_timeout))
        .bind(cli.bind)?;
    if let Some(addr) = server.local_addr() {
        tracing::info!(%addr, "hub listening");
    }
    let report = server.run().await?;
    tracing::info!(drained = report.drained, aborted = report.aborted, "shut down");
    Ok(())
}
