//! Tests for the hub server: HTTP transport hooks, the accept loop and
//! shutdown.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use rstest::{fixture, rstest};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, duplex},
    net::TcpStream,
    sync::oneshot,
    time::{Instant, timeout},
};
use tokio_tungstenite::{client_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;

use super::{accept::AcceptListener, *};
use crate::{
    codec::DEFAULT_MAX_MESSAGE_SIZE,
    connection::ConnectionError,
    hub::{HandlerResult, Hub, HubCallContext},
    protocol::{
        CompletionOutcome,
        HandshakeCodec,
        HandshakeRequest,
        HubMessage,
        JsonHubProtocol,
        ProtocolCodec,
    },
};

async fn add(_ctx: HubCallContext, (a, b): (i64, i64)) -> HandlerResult<i64> { Ok(a + b) }

#[fixture]
fn server() -> HubServer {
    let hub = Hub::builder()
        .method("Add", add)
        .expect("unique method")
        .build();
    HubServer::new(HubConnectionHandler::new(hub))
}

#[fixture]
fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

fn json_codec() -> ProtocolCodec { ProtocolCodec::new(Arc::new(JsonHubProtocol), DEFAULT_MAX_MESSAGE_SIZE) }

fn handshake_frame() -> Bytes {
    HandshakeCodec::default()
        .encode_request(&HandshakeRequest::new("json", 1))
        .expect("encode handshake")
}

fn add_frame(id: &str) -> Bytes {
    json_codec()
        .encode(&HubMessage::invocation(
            Some(id.into()),
            "Add",
            vec![json!(2), json!(3)],
        ))
        .expect("encode invocation")
}

fn assert_sum(message: &HubMessage, id: &str) {
    let HubMessage::Completion(completion) = message else {
        panic!("expected a completion, got {message:?}");
    };
    assert_eq!(completion.invocation_id, id);
    assert_eq!(completion.outcome, CompletionOutcome::Result(json!(5)));
}

async fn poll_data(handle: &LongPollingHandle) -> Bytes {
    match handle.poll().await {
        PollResult::Data(batch) => batch,
        other => panic!("expected data, got {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn long_polling_round_trip(server: HubServer) {
    let (_connection, negotiate) = server.negotiate(1);
    let token = negotiate.connection_token.expect("v1 issues a token");
    let handle = server
        .start_long_polling(&token, TransferFormat::Text)
        .expect("start long polling");

    server.post(&token, handshake_frame()).await.expect("post handshake");
    assert_eq!(poll_data(&handle).await.as_ref(), b"{}\x1e");

    server.post(&token, add_frame("1")).await.expect("post invocation");
    let batch = poll_data(&handle).await;
    let messages = json_codec().decode_all(&batch).expect("whole frames");
    assert_eq!(messages.len(), 1);
    assert_sum(&messages[0], "1");

    assert!(server.disconnect(&token));
    assert!(!server.disconnect(&token));
    let closed = timeout(Duration::from_secs(1), async {
        loop {
            if handle.poll().await == PollResult::Closed {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "long polling handle never reported closed");
}

#[rstest]
#[tokio::test]
async fn sse_streams_events_for_posted_invocations(server: HubServer) {
    let (connection, _) = server.negotiate(1);
    let token = connection.token().to_owned();
    let (writer, mut reader) = duplex(4096);
    server.start_sse(&token, writer).expect("start sse");

    server.post(&token, handshake_frame()).await.expect("post handshake");
    server.post(&token, add_frame("7")).await.expect("post invocation");

    let mut seen = BytesMut::new();
    let mut chunk = [0_u8; 512];
    let expected: &[u8] = br#""invocationId":"7""#;
    timeout(Duration::from_secs(1), async {
        while !seen.windows(expected.len()).any(|w| w == expected) {
            let n = reader.read(&mut chunk).await.expect("read sse");
            assert!(n > 0, "sse stream ended early");
            seen.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .expect("completion event within a second");
    assert!(seen.starts_with(b":\r\ndata: {}\x1e\r\n\r\n"));

    assert!(matches!(
        server.poll(&token).await,
        Err(ServerError::NoHttpTransport)
    ));
}

#[rstest]
#[tokio::test]
async fn unknown_tokens_are_rejected(server: HubServer) {
    assert!(matches!(
        server.post("missing", Bytes::new()).await,
        Err(ServerError::UnknownConnection)
    ));
    assert!(matches!(
        server.poll("missing").await,
        Err(ServerError::UnknownConnection)
    ));
    assert!(matches!(
        server.start_long_polling("missing", TransferFormat::Text),
        Err(ServerError::UnknownConnection)
    ));
}

#[rstest]
#[tokio::test]
async fn second_transport_is_refused(server: HubServer) {
    let (connection, _) = server.negotiate(1);
    server
        .start_long_polling(connection.token(), TransferFormat::Text)
        .expect("first transport");
    let (writer, _reader) = duplex(64);
    let err = server
        .start_sse(connection.token(), writer)
        .expect_err("second transport");
    assert!(matches!(
        err,
        ServerError::Connection(ConnectionError::TransportAlreadyAttached(
            TransportKind::LongPolling
        ))
    ));
}

#[rstest]
#[tokio::test]
async fn in_process_connections_reach_the_hub(server: HubServer) {
    let (connection, mut pipe) = server.connect_pipe();
    assert!(server.manager().try_get_connection(connection.token()).is_some());

    pipe.send(handshake_frame()).await.expect("send handshake");
    assert_eq!(pipe.recv().await.as_deref(), Some(&b"{}\x1e"[..]));
    pipe.send(add_frame("1")).await.expect("send invocation");
    let frame = pipe.recv().await.expect("completion frame");
    assert_sum(&json_codec().decode_all(&frame).expect("frame")[0], "1");

    let report = server.shutdown().await;
    assert_eq!(report.drained, 1);
    assert_eq!(report.aborted, 0);
    assert!(server.manager().is_empty());
}

#[rstest]
#[tokio::test]
async fn websocket_connections_are_served_until_shutdown(
    server: HubServer,
    free_listener: StdTcpListener,
) {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = server
        .ready_signal(ready_tx)
        .bind_existing_listener(free_listener)
        .expect("bind");
    let addr = server.local_addr().expect("local addr");
    let running = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("server ready");

    let stream = TcpStream::connect(addr).await.expect("connect");
    let (mut ws, _) = client_async(format!("ws://{addr}/hub"), stream)
        .await
        .expect("websocket upgrade");
    let text = |frame: Bytes| WsMessage::text(String::from_utf8(frame.to_vec()).expect("utf-8"));
    ws.send(text(handshake_frame())).await.expect("send handshake");
    let reply = ws.next().await.expect("handshake reply").expect("ws ok");
    assert_eq!(reply.into_data().as_ref(), b"{}\x1e");

    ws.send(text(add_frame("1"))).await.expect("send invocation");
    let reply = ws.next().await.expect("completion").expect("ws ok");
    assert_sum(&json_codec().decode_all(&reply.into_data()).expect("frame")[0], "1");

    stop_tx.send(()).expect("server still running");
    let reply = ws.next().await.expect("close").expect("ws ok");
    let messages = json_codec().decode_all(&reply.into_data()).expect("frame");
    assert!(matches!(&messages[0], HubMessage::Close(close) if close.error.is_none()));

    let report = timeout(Duration::from_secs(5), running)
        .await
        .expect("server stops")
        .expect("server task")
        .expect("server result");
    assert_eq!(report.drained + report.aborted, 1);
}

#[rstest]
#[tokio::test]
async fn bind_reports_address_in_use(server: HubServer, free_listener: StdTcpListener) {
    let addr = free_listener.local_addr().expect("local addr");
    let err = server.bind(addr).expect_err("address already bound");
    assert!(matches!(err, ServerError::Bind(_)));
}

/// Listener failing a fixed number of times, then waiting forever.
struct FailingListener {
    calls: Mutex<Vec<Instant>>,
    failures: usize,
}

#[async_trait]
impl AcceptListener for FailingListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let failed = {
            let mut calls = self.calls.lock().expect("lock");
            calls.push(Instant::now());
            calls.len() <= self.failures
        };
        if failed {
            return Err(io::Error::other("mock error"));
        }
        std::future::pending().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { Ok(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)) }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn accept_failures_back_off_exponentially(server: HubServer) {
    let listener = Arc::new(FailingListener {
        calls: Mutex::new(Vec::new()),
        failures: 4,
    });
    let shutdown = CancellationToken::new();
    let backoff = BackoffConfig {
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };
    let task = tokio::spawn(accept_loop(
        Arc::clone(&listener),
        server.core.clone(),
        shutdown.clone(),
        backoff,
    ));

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    task.await.expect("accept loop");

    let calls = listener.calls.lock().expect("lock");
    let intervals: Vec<_> = calls.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(intervals, [5, 10, 20, 20].map(Duration::from_millis));
}
