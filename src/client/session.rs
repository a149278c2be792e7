//! One established client connection: correlation of pending invocations
//! and the task driving the pipe.

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use bytes::BytesMut;
use dashmap::DashMap;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ClientError, ClientMethod};
use crate::{
    protocol::{CompletionOutcome, HubMessage, ProtocolCodec},
    push::{PushHandle, PushQueues},
    transport::{PipeEnd, PipeSender},
};

/// Waiter for the outcome of an invocation.
pub(crate) enum Pending {
    Invocation(oneshot::Sender<Result<Option<Value>, ClientError>>),
    Stream(mpsc::Sender<Result<Value, ClientError>>),
}

impl Pending {
    async fn complete(self, outcome: CompletionOutcome) {
        match (self, outcome) {
            (Self::Invocation(tx), CompletionOutcome::Void) => {
                let _ = tx.send(Ok(None));
            }
            (Self::Invocation(tx), CompletionOutcome::Result(value)) => {
                let _ = tx.send(Ok(Some(value)));
            }
            (Self::Invocation(tx), CompletionOutcome::Error(error)) => {
                let _ = tx.send(Err(ClientError::Invocation(error)));
            }
            (Self::Stream(tx), CompletionOutcome::Error(error)) => {
                let _ = tx.send(Err(ClientError::Invocation(error))).await;
            }
            // Dropping the sender ends the stream.
            (Self::Stream(_), _) => {}
        }
    }

    /// Deliver `error` to the waiter. A stream whose buffer is full keeps
    /// its sender until the consumer has room, so the error is never lost.
    fn fail(self, error: ClientError) {
        match self {
            Self::Invocation(tx) => {
                let _ = tx.send(Err(error));
            }
            Self::Stream(tx) => {
                if let Err(mpsc::error::TrySendError::Full(error)) = tx.try_send(Err(error)) {
                    tokio::spawn(async move {
                        let _ = tx.send(error).await;
                    });
                }
            }
        }
    }
}

/// State shared between the client handle and the connection's driver.
pub(crate) struct Session {
    pub(crate) connection_id: Option<String>,
    pub(crate) outbound: PushHandle<HubMessage>,
    pub(crate) pending: DashMap<String, Pending>,
}

impl Session {
    pub(crate) fn new(connection_id: Option<String>, outbound: PushHandle<HubMessage>) -> Self {
        Self {
            connection_id,
            outbound,
            pending: DashMap::new(),
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                pending.fail(ClientError::ConnectionLost);
            }
        }
    }
}

/// Why a driver stopped.
#[derive(Debug)]
pub(crate) enum Ended {
    /// The client was stopped.
    Stopped,
    /// The server sent `Close`.
    Closed {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// The connection failed in a way that allows reconnecting.
    Lost(ClientError),
    /// The server broke the protocol; the stream cannot be trusted.
    Faulted(ClientError),
}

impl Ended {
    pub(crate) fn allows_reconnect(&self) -> bool {
        match self {
            Self::Stopped | Self::Faulted(_) => false,
            Self::Closed {
                allow_reconnect, ..
            } => *allow_reconnect,
            Self::Lost(_) => true,
        }
    }
}

/// Owns the pipe of one connection: writes queued messages and pings,
/// routes inbound messages and watches the server timeout.
pub(crate) struct Driver {
    pub(crate) session: Arc<Session>,
    pub(crate) codec: ProtocolCodec,
    pub(crate) pipe: PipeEnd,
    /// Bytes received together with the handshake response.
    pub(crate) buffer: BytesMut,
    pub(crate) queues: PushQueues<HubMessage>,
    pub(crate) handlers: Arc<HashMap<String, ClientMethod>>,
    pub(crate) keep_alive_interval: Duration,
    pub(crate) server_timeout: Duration,
    pub(crate) stop: CancellationToken,
}

impl Driver {
    pub(crate) async fn run(self) -> Ended {
        let Driver {
            session,
            codec,
            pipe,
            mut buffer,
            mut queues,
            handlers,
            keep_alive_interval,
            server_timeout,
            stop,
        } = self;
        let (tx, mut rx) = pipe.split();
        let mut ping_at = Instant::now() + keep_alive_interval;
        let mut server_deadline = Instant::now() + server_timeout;

        let mut ended = drain(&codec, &mut buffer, &session, &handlers).await;
        while ended.is_none() {
            ended = tokio::select! {
                biased;

                () = stop.cancelled() => {
                    let _ = write(&codec, &tx, &HubMessage::close(None, false)).await;
                    Some(Ended::Stopped)
                }
                out = queues.recv() => match out {
                    Some((_, message)) => {
                        ping_at = Instant::now() + keep_alive_interval;
                        write(&codec, &tx, &message).await.err().map(Ended::Lost)
                    }
                    None => Some(Ended::Stopped),
                },
                () = sleep_until(ping_at) => {
                    ping_at = Instant::now() + keep_alive_interval;
                    write(&codec, &tx, &HubMessage::Ping).await.err().map(Ended::Lost)
                }
                () = sleep_until(server_deadline) => {
                    Some(Ended::Lost(ClientError::Timeout("server")))
                }
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        server_deadline = Instant::now() + server_timeout;
                        buffer.extend_from_slice(&frame);
                        drain(&codec, &mut buffer, &session, &handlers).await
                    }
                    None => Some(Ended::Lost(ClientError::ConnectionLost)),
                },
            };
        }
        // Queued invocations must fail to push before pending ones are failed.
        drop(queues);
        session.fail_pending();
        ended.unwrap_or(Ended::Stopped)
    }
}

async fn write(codec: &ProtocolCodec, tx: &PipeSender, message: &HubMessage) -> Result<(), ClientError> {
    let frame = codec.encode(message)?;
    tx.send(frame).await?;
    Ok(())
}

async fn drain(
    codec: &ProtocolCodec,
    buffer: &mut BytesMut,
    session: &Session,
    handlers: &HashMap<String, ClientMethod>,
) -> Option<Ended> {
    loop {
        let message = match codec.try_parse_message(buffer) {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(e) => return Some(Ended::Faulted(e.into())),
        };
        if let Some(ended) = handle(message, session, handlers).await {
            return Some(ended);
        }
    }
}

async fn handle(
    message: HubMessage,
    session: &Session,
    handlers: &HashMap<String, ClientMethod>,
) -> Option<Ended> {
    match message {
        HubMessage::Invocation(invocation) => {
            let Some(handler) = handlers.get(&invocation.target) else {
                warn!(method = %invocation.target, "no client method registered");
                return None;
            };
            let arguments = invocation.arguments;
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(arguments))) {
                let panic_msg = crate::panic::format_panic(panic);
                log::error!("client method panicked: panic={panic_msg}, target={}", invocation.target);
            }
            None
        }
        HubMessage::StreamItem(item) => {
            let sender = session
                .pending
                .get(&item.invocation_id)
                .and_then(|pending| match pending.value() {
                    Pending::Stream(tx) => Some(tx.clone()),
                    Pending::Invocation(_) => None,
                });
            match sender {
                Some(tx) => {
                    let _ = tx.send(Ok(item.item)).await;
                }
                None => debug!(invocation_id = %item.invocation_id, "stream item for unknown stream"),
            }
            None
        }
        HubMessage::Completion(completion) => {
            match session.pending.remove(&completion.invocation_id) {
                Some((_, pending)) => pending.complete(completion.outcome).await,
                None => debug!(
                    invocation_id = %completion.invocation_id,
                    "completion for unknown invocation"
                ),
            }
            None
        }
        HubMessage::Ping => None,
        HubMessage::Close(close) => Some(Ended::Closed {
            error: close.error,
            allow_reconnect: close.allow_reconnect,
        }),
        other @ (HubMessage::StreamInvocation(_) | HubMessage::CancelInvocation(_)) => {
            Some(Ended::Faulted(ClientError::Protocol(format!(
                "Unexpected message of type {:?} received.",
                other.message_type()
            ))))
        }
    }
}
