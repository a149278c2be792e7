//! Typed client against a server listening on a real socket.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{Stream, StreamExt};
use hubframe::{
    HubClient,
    HubConnectionState,
    client::{FixedDelays, WebSocketConnector},
    hub::{HandlerResult, Hub, HubCallContext},
    manager::{ConnectionManager, ShutdownReport},
};
use hubframe_testing::{TestResult, hub_server, unused_listener, wait_until};
use serde_json::{Value, json};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::timeout,
};

async fn add(_ctx: HubCallContext, (a, b): (i64, i64)) -> HandlerResult<i64> { Ok(a + b) }

async fn announce(ctx: HubCallContext, (text,): (String,)) -> HandlerResult<usize> {
    Ok(ctx.clients().broadcast("Notice", &[json!(text)]))
}

fn range(_ctx: HubCallContext, (from, to): (u32, u32)) -> impl Stream<Item = HandlerResult<u32>> {
    futures::stream::iter((from..to).map(Ok))
}

type ServerTask = JoinHandle<Result<ShutdownReport, hubframe::ServerError>>;

struct Running {
    connector: WebSocketConnector,
    manager: ConnectionManager,
    stop: oneshot::Sender<()>,
    task: ServerTask,
}

impl Running {
    async fn stop(self) -> TestResult<ShutdownReport> {
        let _ = self.stop.send(());
        Ok(timeout(Duration::from_secs(10), self.task).await???)
    }
}

async fn start_server() -> TestResult<Running> {
    let hub = Hub::builder()
        .method("Add", add)?
        .method("Announce", announce)?
        .stream("Range", range)?
        .build();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let server = hub_server(hub)
        .ready_signal(ready_tx)
        .bind_existing_listener(unused_listener()?)?;
    let addr = server.local_addr().ok_or("server missing local addr")?;
    let manager = server.manager().clone();
    let task = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await?;
    Ok(Running {
        connector: WebSocketConnector::new(addr).path("/chat"),
        manager,
        stop,
        task,
    })
}

async fn reach(
    states: &mut watch::Receiver<HubConnectionState>,
    wanted: HubConnectionState,
) -> TestResult {
    timeout(Duration::from_secs(10), states.wait_for(|s| *s == wanted)).await??;
    Ok(())
}

#[tokio::test]
async fn invocations_streams_and_callbacks_over_websockets() -> TestResult {
    let running = start_server().await?;
    let notices = Arc::new(Mutex::new(Vec::<Value>::new()));
    let seen = Arc::clone(&notices);
    let client = HubClient::builder(running.connector.clone())
        .on("Notice", move |args| {
            seen.lock().expect("notice lock").extend(args);
        })
        .build();
    client.start().await?;

    let sum: i64 = client.invoke("Add", (19, 23)).await?;
    assert_eq!(sum, 42);

    let items: Vec<u32> = client
        .stream::<_, u32>("Range", (5, 9))
        .await?
        .map(|item| item.expect("stream item"))
        .collect()
        .await;
    assert_eq!(items, [5, 6, 7, 8]);

    let reached: usize = client.invoke("Announce", ("hello",)).await?;
    assert_eq!(reached, 1);
    // The callback ran before the completion was read.
    assert_eq!(*notices.lock().expect("notice lock"), [json!("hello")]);

    client.stop().await;
    let report = running.stop().await?;
    assert_eq!(report.aborted, 0);
    Ok(())
}

#[tokio::test]
async fn dropped_client_reconnects_then_server_shutdown_disconnects_it() -> TestResult {
    let running = start_server().await?;
    let client = HubClient::builder(running.connector.clone())
        .retry_policy(FixedDelays(vec![Duration::from_millis(10); 3]))
        .build();
    client.start().await?;
    let mut states = client.subscribe_state();

    let connections = running.manager.connections();
    let [only] = connections.as_slice() else {
        return Err(format!("expected one connection, found {}", connections.len()).into());
    };
    let dropped = only.token().to_owned();
    assert!(running.manager.remove_connection(&dropped));

    let manager = running.manager.clone();
    wait_until("a fresh connection", Duration::from_secs(10), || {
        manager
            .connections()
            .iter()
            .any(|connection| connection.token() != dropped)
    })
    .await?;
    reach(&mut states, HubConnectionState::Connected).await?;
    let sum: i64 = client.invoke("Add", (1, 1)).await?;
    assert_eq!(sum, 2);

    running.stop().await?;
    reach(&mut states, HubConnectionState::Disconnected).await?;
    Ok(())
}
