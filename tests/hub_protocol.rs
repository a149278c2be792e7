//! End-to-end behaviour of the hub protocol over in-process connections,
//! observed frame by frame.

use std::{sync::Arc, time::Duration};

use futures::Stream;
use hubframe::{
    hub::{HandlerError, HandlerResult, Hub, HubCallContext},
    protocol::{BinaryHubProtocol, CompletionOutcome, HubMessage, JsonHubProtocol},
    server::HubServer,
};
use hubframe_testing::{RawPeer, TestResult, hub_server, recv_expect};
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tokio::{sync::Notify, time::timeout};

async fn add(_ctx: HubCallContext, (a, b): (i64, i64)) -> HandlerResult<i64> { Ok(a + b) }

fn range(_ctx: HubCallContext, (from, to): (u32, u32)) -> impl Stream<Item = HandlerResult<u32>> {
    futures::stream::iter((from..to).map(Ok))
}

fn ticks(_ctx: HubCallContext, (): ()) -> impl Stream<Item = HandlerResult<u64>> {
    async_stream::stream! {
        let mut n = 0;
        loop {
            yield Ok(n);
            n += 1;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

/// Lets a test hold the `Block` method until it chooses to release it.
#[derive(Clone, Default)]
struct Latch {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

struct Fixture {
    server: HubServer,
    latch: Latch,
}

#[fixture]
fn fixture() -> Fixture {
    let latch = Latch::default();
    let block = latch.clone();
    let hub = Hub::builder()
        .method("Add", add)
        .and_then(|b| b.stream("Range", range))
        .and_then(|b| b.stream("Ticks", ticks))
        .and_then(|b| {
            b.method("Block", move |_ctx: HubCallContext, (): ()| {
                let latch = block.clone();
                async move {
                    latch.entered.notify_one();
                    latch.release.notified().await;
                    Ok::<_, HandlerError>("unblocked")
                }
            })
        })
        .expect("unique method names")
        .build();
    Fixture {
        server: hub_server(hub),
        latch,
    }
}

fn done(id: &str, outcome: CompletionOutcome) -> HubMessage { HubMessage::completion(id, outcome) }

#[rstest]
#[tokio::test]
async fn handshake_then_invocation_round_trip(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.invoke("1", "Add", vec![json!(40), json!(2)]).await?;

    assert_eq!(
        recv_expect!(peer.next()),
        done("1", CompletionOutcome::Result(json!(42)))
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn binary_peers_are_served_in_process(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, BinaryHubProtocol).await?;

    peer.invoke("b", "Add", vec![json!(-1), json!(1)]).await?;

    assert_eq!(
        recv_expect!(peer.next()),
        done("b", CompletionOutcome::Result(json!(0)))
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn blocked_invocation_does_not_hold_back_others(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.invoke("slow", "Block", vec![]).await?;
    fixture.latch.entered.notified().await;
    for id in ["a", "b", "c"] {
        peer.invoke(id, "Add", vec![json!(1), json!(1)]).await?;
    }
    let mut fast = Vec::new();
    for _ in 0..3 {
        let HubMessage::Completion(completion) = recv_expect!(peer.next()) else {
            panic!("expected completions only");
        };
        fast.push(completion.invocation_id);
    }
    fast.sort();
    assert_eq!(fast, ["a", "b", "c"]);

    fixture.latch.release.notify_one();
    assert_eq!(
        recv_expect!(peer.next()),
        done("slow", CompletionOutcome::Result(json!("unblocked")))
    );
    Ok(())
}

#[rstest]
#[case::known("Add", vec![json!(1), json!(2)])]
#[case::unknown("Missing", vec![])]
#[tokio::test]
async fn fire_and_forget_is_never_answered(
    fixture: Fixture,
    #[case] target: &str,
    #[case] arguments: Vec<Value>,
) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.notify(target, arguments).await?;
    peer.invoke("probe", "Add", vec![json!(0), json!(0)]).await?;

    assert_eq!(
        recv_expect!(peer.next()),
        done("probe", CompletionOutcome::Result(json!(0)))
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unknown_method_completes_with_error(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.invoke("9", "Missing", vec![json!(true)]).await?;

    assert_eq!(
        recv_expect!(peer.next()),
        done("9", CompletionOutcome::Error("Unknown method 'Missing'".into()))
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn duplicate_invocation_id_is_refused_while_outstanding(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.invoke("dup", "Block", vec![]).await?;
    fixture.latch.entered.notified().await;
    peer.invoke("dup", "Add", vec![json!(1), json!(1)]).await?;

    assert_eq!(
        recv_expect!(peer.next()),
        done(
            "dup",
            CompletionOutcome::Error("Invocation ID 'dup' is already in use.".into())
        )
    );
    fixture.latch.release.notify_one();
    assert_eq!(
        recv_expect!(peer.next()),
        done("dup", CompletionOutcome::Result(json!("unblocked")))
    );
    Ok(())
}

#[rstest]
#[tokio::test]
async fn stream_items_arrive_in_order_then_complete(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.stream("s", "Range", vec![json!(3), json!(7)]).await?;

    for n in 3..7 {
        assert_eq!(
            recv_expect!(peer.next()),
            HubMessage::stream_item("s", json!(n))
        );
    }
    assert_eq!(recv_expect!(peer.next()), done("s", CompletionOutcome::Void));
    Ok(())
}

#[rstest]
#[tokio::test]
async fn cancelled_stream_goes_quiet_without_completion(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::connect(&fixture.server, JsonHubProtocol).await?;

    peer.stream("t", "Ticks", vec![]).await?;
    assert_eq!(
        recv_expect!(peer.next()),
        HubMessage::stream_item("t", json!(0))
    );
    peer.send(&HubMessage::cancel("t")).await?;
    peer.invoke("after", "Add", vec![json!(2), json!(2)]).await?;

    // Items already queued may still arrive before the probe's completion.
    loop {
        match recv_expect!(peer.next()) {
            HubMessage::StreamItem(item) => assert_eq!(item.invocation_id, "t"),
            HubMessage::Completion(completion) => {
                assert_eq!(completion.invocation_id, "after");
                break;
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
    let quiet = timeout(Duration::from_millis(50), peer.next()).await;
    assert!(quiet.is_err(), "stream kept going: {quiet:?}");
    Ok(())
}

#[rstest]
#[tokio::test]
async fn hub_message_before_handshake_closes_the_connection(fixture: Fixture) -> TestResult {
    let mut peer = RawPeer::open(&fixture.server, JsonHubProtocol);

    peer.invoke("1", "Add", vec![json!(1), json!(1)]).await?;

    let response = recv_expect!(peer.handshake_response());
    let error = response.error.ok_or("expected an error response")?;
    assert!(error.starts_with("Failed to parse handshake request"), "{error}");
    assert_eq!(peer.next_raw().await, None);
    Ok(())
}
