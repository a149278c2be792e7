//! Server shutdown: draining idle connections and aborting stuck ones.

use std::time::Duration;

use hubframe::{
    HubClient,
    hub::{HandlerResult, Hub, HubCallContext},
    manager::{ConnectionManagerOptions, ShutdownReport},
    protocol::{HubMessage, JsonHubProtocol},
    server::HubServer,
};
use hubframe_testing::{RawPeer, TestResult, hub_server, recv_expect};

async fn stall(ctx: HubCallContext, (): ()) -> HandlerResult<()> {
    // Only an abort gets past this.
    ctx.cancellation().cancelled().await;
    Ok(())
}

fn server(drain: Duration) -> HubServer {
    let hub = Hub::builder()
        .method("Stall", stall)
        .expect("unique method names")
        .build();
    hub_server(hub).with_manager_options(ConnectionManagerOptions::default().drain_timeout(drain))
}

#[tokio::test]
async fn idle_connections_drain_with_a_close() -> TestResult {
    let server = server(Duration::from_secs(5));
    let mut alice = RawPeer::connect(&server, JsonHubProtocol).await?;
    let mut bob = RawPeer::connect(&server, JsonHubProtocol).await?;

    let report = server.shutdown().await;

    assert_eq!(report, ShutdownReport { drained: 2, aborted: 0 });
    for peer in [&mut alice, &mut bob] {
        assert_eq!(recv_expect!(peer.next()), HubMessage::close(None, false));
        assert_eq!(peer.next().await, None);
    }
    assert!(server.manager().is_empty());
    Ok(())
}

#[tokio::test]
async fn stuck_invocations_are_aborted_after_the_drain_period() -> TestResult {
    let server = server(Duration::from_millis(50));
    let mut peer = RawPeer::connect(&server, JsonHubProtocol).await?;
    let mut events = server.manager().subscribe();
    peer.invoke("1", "Stall", vec![]).await?;
    // Let the invocation start before shutting down.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = server.shutdown().await;

    assert_eq!(report, ShutdownReport { drained: 0, aborted: 1 });
    assert_eq!(peer.drain().await, Vec::<HubMessage>::new());
    assert!(events.try_recv().is_ok(), "removal should be announced");
    Ok(())
}

#[tokio::test]
async fn clients_cannot_connect_once_shut_down() -> TestResult {
    let server = server(Duration::from_secs(1));
    server.shutdown().await;

    let client = HubClient::builder(server.pipe_connector())
        .without_reconnect()
        .build();

    assert!(client.start().await.is_err());
    Ok(())
}
