//! Long polling through the server's HTTP hooks: buffering between polls,
//! overflow and idle removal.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::Stream;
use hubframe::{
    codec::DEFAULT_MAX_MESSAGE_SIZE,
    connection::AbortReason,
    hub::{HandlerResult, Hub, HubCallContext},
    manager::{ConnectionEvent, ConnectionManagerOptions},
    protocol::{
        CompletionOutcome,
        HandshakeCodec,
        HandshakeRequest,
        HubMessage,
        JsonHubProtocol,
        ProtocolCodec,
    },
    server::{HubServer, ServerConfig, ServerError},
    transport::{LongPollingHandle, LongPollingOptions, PollResult, TransferFormat},
};
use hubframe_testing::{TestResult, hub_server, wait_until};
use serde_json::json;

fn range(_ctx: HubCallContext, (from, to): (u32, u32)) -> impl Stream<Item = HandlerResult<u32>> {
    futures::stream::iter((from..to).map(Ok))
}

fn server() -> HubServer {
    let hub = Hub::builder()
        .stream("Range", range)
        .expect("unique method names")
        .build();
    hub_server(hub)
}

fn codec() -> ProtocolCodec { ProtocolCodec::new(Arc::new(JsonHubProtocol), DEFAULT_MAX_MESSAGE_SIZE) }

fn handshake() -> TestResult<Bytes> {
    Ok(HandshakeCodec::default().encode_request(&HandshakeRequest::new("json", 1))?)
}

/// Negotiate, start long polling and complete the handshake.
async fn open(server: &HubServer) -> TestResult<(String, LongPollingHandle)> {
    let (_connection, negotiate) = server.negotiate(1);
    let token = negotiate.connection_token.ok_or("negotiate v1 issues a token")?;
    let handle = server.start_long_polling(&token, TransferFormat::Text)?;
    server.post(&token, handshake()?).await?;
    match server.poll(&token).await? {
        PollResult::Data(batch) if batch.as_ref() == b"{}\x1e" => Ok((token, handle)),
        other => Err(format!("unexpected handshake poll: {other:?}").into()),
    }
}

#[tokio::test]
async fn messages_buffer_until_the_next_poll() -> TestResult {
    let server = server();
    let (token, handle) = open(&server).await?;
    let stream = HubMessage::stream_invocation("s", "Range", vec![json!(0), json!(4)]);
    server.post(&token, codec().encode(&stream)?).await?;

    // Give the stream time to finish before anyone polls.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut messages = Vec::new();
    while !matches!(messages.last(), Some(HubMessage::Completion(_))) {
        match server.poll(&token).await? {
            PollResult::Data(batch) => messages.extend(codec().decode_all(&batch)?),
            other => return Err(format!("unexpected poll result: {other:?}").into()),
        }
    }

    let mut expected: Vec<HubMessage> =
        (0..4).map(|n| HubMessage::stream_item("s", json!(n))).collect();
    expected.push(HubMessage::completion("s", CompletionOutcome::Void));
    assert_eq!(messages, expected);
    assert!(!handle.is_closed());
    Ok(())
}

#[tokio::test]
async fn client_that_stops_polling_overflows_the_buffer() -> TestResult {
    let config = ServerConfig {
        long_polling: LongPollingOptions::default().max_buffered_messages(3),
        ..ServerConfig::default()
    };
    let server = server().with_config(config);
    let (token, handle) = open(&server).await?;
    let stream = HubMessage::stream_invocation("s", "Range", vec![json!(0), json!(100)]);
    server.post(&token, codec().encode(&stream)?).await?;

    wait_until("buffer overflow", Duration::from_secs(5), || handle.is_closed()).await?;

    let PollResult::Data(batch) = handle.poll().await else {
        return Err("buffered frames should still be delivered".into());
    };
    assert_eq!(codec().decode_all(&batch)?.len(), 3);
    assert_eq!(handle.poll().await, PollResult::Closed);
    wait_until("connection removal", Duration::from_secs(5), || {
        server.manager().try_get_connection(&token).is_none()
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn idle_connections_are_swept() -> TestResult {
    let options = ConnectionManagerOptions::default()
        .liveness_timeout(Duration::from_millis(50))
        .scan_interval(Duration::from_millis(10));
    let server = server().with_manager_options(options);
    let mut events = server.manager().subscribe();
    let (token, handle) = open(&server).await?;
    let scan = server.manager().spawn_idle_scan();

    let removed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ConnectionEvent::Removed { reason, .. }) = events.recv().await {
                return reason;
            }
        }
    })
    .await?;

    assert_eq!(removed, AbortReason::TimedOut);
    assert!(matches!(
        server.poll(&token).await,
        Err(ServerError::UnknownConnection)
    ));
    wait_until("transport teardown", Duration::from_secs(5), || handle.is_closed()).await?;
    scan.abort();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn parked_poll_keeps_the_connection_alive() -> TestResult {
    let server = server();
    let (token, handle) = open(&server).await?;
    let scan = server.manager().spawn_idle_scan();

    // The default poll timeout outlasts the default liveness timeout.
    assert_eq!(server.poll(&token).await?, PollResult::Timeout);
    assert!(server.manager().try_get_connection(&token).is_some());
    assert_eq!(server.poll(&token).await?, PollResult::Timeout);
    assert!(server.manager().try_get_connection(&token).is_some());
    assert!(!handle.is_closed());
    scan.abort();
    Ok(())
}
