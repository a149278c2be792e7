//! Server side of one hub connection.
//!
//! [`HubConnectionHandler::run`] owns the application end of a connection's
//! pipe. It performs the handshake, then reads hub messages and runs each
//! invocation on its own task. Everything written back goes through the
//! connection's [`PushQueues`], drained by a single writer task that also
//! emits keep-alive pings.

use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use dashmap::DashMap;
use futures::StreamExt;
use log::{error, info};
use serde_json::Value;
use tokio::{
    sync::Semaphore,
    time::{Instant, sleep_until},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace, warn};

use super::{Hub, HubCallContext, HubClients, HubOptions, Invoker};
use crate::{
    connection::Connection,
    error::HubError,
    metrics::{self, Direction, InvocationKind},
    protocol::{
        CompletionOutcome,
        HandshakeCodec,
        HandshakeRequest,
        HandshakeResponse,
        HubMessage,
        HubProtocol,
        InvocationMessage,
        ProtocolCodec,
        ProtocolError,
        ProtocolRegistry,
        StreamInvocationMessage,
    },
    push::{PushHandle, PushQueues},
    transport::{PipeEnd, PipeReceiver, PipeSender, TransferFormat, TransportError},
};

/// Serves hub connections for one [`Hub`].
///
/// Cheap to clone; every clone shares the hub, the protocol registry and the
/// [`HubClients`] registry.
#[derive(Clone, Debug)]
pub struct HubConnectionHandler {
    hub: Arc<Hub>,
    protocols: Arc<ProtocolRegistry>,
    options: HubOptions,
    clients: HubClients,
}

impl HubConnectionHandler {
    /// Handler speaking every built-in protocol with default options.
    #[must_use]
    pub fn new(hub: Hub) -> Self {
        Self {
            hub: Arc::new(hub),
            protocols: Arc::new(ProtocolRegistry::default()),
            options: HubOptions::default(),
            clients: HubClients::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: HubOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_protocols(mut self, protocols: ProtocolRegistry) -> Self {
        self.protocols = Arc::new(protocols);
        self
    }

    #[must_use]
    pub fn options(&self) -> &HubOptions { &self.options }

    /// Connections currently served by this handler.
    #[must_use]
    pub fn clients(&self) -> &HubClients { &self.clients }

    /// Serve `connection` over `pipe` until it closes.
    ///
    /// Returns `Ok(())` when the client leaves or the connection is stopped
    /// gracefully.
    ///
    /// # Errors
    ///
    /// Returns the [`HubError`] that ended the connection. Protocol
    /// violations, malformed input and client timeouts are reported to the
    /// client with a `Close` message first.
    pub async fn run(&self, connection: Arc<Connection>, pipe: PipeEnd) -> Result<(), HubError> {
        let (tx, mut rx) = pipe.split();
        let mut buffer = BytesMut::new();
        let handshake = HandshakeCodec::new(self.options.maximum_message_size);
        let protocol = self
            .handshake(&handshake, &connection, &tx, &mut rx, &mut buffer)
            .await
            .inspect_err(|e| metrics::inc_errors(e.kind()))?;
        let codec = ProtocolCodec::new(protocol, self.options.maximum_message_size);

        let (queues, caller) = PushQueues::builder()
            .high_capacity(self.options.high_priority_capacity)
            .low_capacity(self.options.low_priority_capacity)
            .rate(self.options.push_rate)
            .build()?;
        let accepted = handshake.encode_response(&HandshakeResponse::success())?;
        // Reachable by broadcasts before the client sees the reply.
        self.clients.insert(connection.id().clone(), &caller);
        if let Err(e) = tx.send(accepted).await {
            self.clients.remove(connection.id());
            return Err(e.into());
        }
        let keep_alive = connection
            .transport()
            .is_none_or(|features| !features.inherent_keep_alive)
            .then_some(self.options.keep_alive_interval);
        let mut writer = tokio::spawn(write_loop(
            queues,
            tx,
            codec.clone(),
            keep_alive,
            connection.abort_token(),
        ));
        info!(
            "hub connection established: connection_id={}, protocol={}",
            connection.id(),
            codec.protocol().name()
        );

        let session = Session {
            handler: self.clone(),
            connection: Arc::clone(&connection),
            caller: caller.clone(),
            outstanding: Arc::new(DashMap::new()),
            tasks: TaskTracker::new(),
            parallel: Arc::new(Semaphore::new(self.options.maximum_parallel_invocations)),
            stopping: false,
        };
        let result = session.run(codec, rx, buffer).await;

        self.clients.remove(connection.id());
        if let Some(hook) = &self.hub.on_disconnected {
            let ctx = self.lifecycle_context(&connection, caller.clone());
            let error = result.as_ref().err().map(ToString::to_string);
            if let Err(panic_msg) = crate::panic::catch_panic(hook(ctx, error)).await {
                error!("on_disconnected hook panicked: panic={panic_msg}, connection_id={}", connection.id());
                tracing::error!(panic = %panic_msg, connection_id = %connection.id(), "on_disconnected hook panicked");
            }
        }
        drop(caller);
        if tokio::time::timeout(self.options.close_timeout, &mut writer)
            .await
            .is_err()
        {
            debug!(connection_id = %connection.id(), "writer did not finish; aborting it");
            writer.abort();
        }
        match &result {
            Ok(()) => info!("hub connection closed: connection_id={}", connection.id()),
            Err(e) => {
                metrics::inc_errors(e.kind());
                info!(
                    "hub connection closed: connection_id={}, error={e}",
                    connection.id()
                );
            }
        }
        result
    }

    fn lifecycle_context(
        &self,
        connection: &Arc<Connection>,
        caller: PushHandle<HubMessage>,
    ) -> HubCallContext {
        HubCallContext::new(
            Arc::clone(connection),
            None,
            connection.abort_token(),
            caller,
            self.clients.clone(),
        )
    }

    /// Read the handshake request and pick the protocol, answering
    /// rejections. The success response is left to the caller.
    ///
    /// Bytes following the request remain in `buffer`.
    async fn handshake(
        &self,
        codec: &HandshakeCodec,
        connection: &Connection,
        tx: &PipeSender,
        rx: &mut PipeReceiver,
        buffer: &mut BytesMut,
    ) -> Result<Arc<dyn HubProtocol>, HubError> {
        let after = self.options.handshake_timeout;
        let abort = connection.abort_token();
        let read = tokio::time::timeout(after, read_handshake(codec, connection, rx, buffer));
        let request = tokio::select! {
            biased;
            () = abort.cancelled() => return Err(TransportError::Closed.into()),
            res = read => match res {
                Err(_) => return Err(HubError::Timeout { what: "handshake", after }),
                Ok(Ok(Some(request))) => request,
                Ok(Ok(None)) => return Err(TransportError::Closed.into()),
                Ok(Err(err)) => {
                    let message = format!("Failed to parse handshake request: {err}");
                    return Err(reject(codec, tx, message).await);
                }
            },
        };
        match self.select_protocol(connection, &request) {
            Ok(protocol) => {
                debug!(
                    connection_id = %connection.id(),
                    protocol = %request.protocol,
                    version = request.version,
                    "handshake accepted"
                );
                Ok(protocol)
            }
            Err(message) => Err(reject(codec, tx, message).await),
        }
    }

    fn select_protocol(
        &self,
        connection: &Connection,
        request: &HandshakeRequest,
    ) -> Result<Arc<dyn HubProtocol>, String> {
        let Some(protocol) = self.protocols.resolve(&request.protocol) else {
            return Err(format!(
                "The protocol '{}' is not supported.",
                request.protocol
            ));
        };
        if !protocol.is_version_supported(request.version) {
            return Err(format!(
                "The server does not support version {} of the '{}' protocol.",
                request.version, request.protocol
            ));
        }
        let format = protocol.transfer_format();
        if let Some(features) = connection.transport()
            && (!features.kind.supports(format)
                || (format == TransferFormat::Binary && features.format == TransferFormat::Text))
        {
            return Err(format!(
                "Cannot use the '{}' protocol on the current transport. The transport does not support '{format}' transfer format.",
                request.protocol
            ));
        }
        Ok(protocol)
    }
}

async fn read_handshake(
    codec: &HandshakeCodec,
    connection: &Connection,
    rx: &mut PipeReceiver,
    buffer: &mut BytesMut,
) -> Result<Option<HandshakeRequest>, ProtocolError> {
    loop {
        if let Some(request) = codec.try_parse_request(buffer)? {
            return Ok(Some(request));
        }
        let Some(frame) = rx.recv().await else {
            return Ok(None);
        };
        connection.touch();
        buffer.extend_from_slice(&frame);
    }
}

/// Send a failed handshake response and build the error ending the
/// connection.
async fn reject(codec: &HandshakeCodec, tx: &PipeSender, message: String) -> HubError {
    warn!(error = %message, "handshake rejected");
    match codec.encode_response(&HandshakeResponse::failure(message.clone())) {
        Ok(frame) => {
            if let Err(e) = tx.send(frame).await {
                debug!(error = %e, "failed to send handshake response");
            }
        }
        Err(e) => debug!(error = %e, "failed to encode handshake response"),
    }
    HubError::ProtocolViolation(message)
}

/// Drain `queues` into the transport, sending a ping whenever nothing was
/// written for `keep_alive`.
async fn write_loop(
    mut queues: PushQueues<HubMessage>,
    tx: PipeSender,
    codec: ProtocolCodec,
    keep_alive: Option<Duration>,
    abort: CancellationToken,
) -> Result<(), HubError> {
    let next_ping = |now: Instant| keep_alive.map(|interval| now + interval);
    let mut ping_at = next_ping(Instant::now());
    loop {
        let ping = async move {
            match ping_at {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let message = tokio::select! {
            biased;
            () = abort.cancelled() => break,
            next = queues.recv() => match next {
                Some((_, message)) => message,
                None => break,
            },
            () = ping => HubMessage::Ping,
        };
        let closing = matches!(message, HubMessage::Close(_));
        let frame = match codec.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::inc_errors("format");
                warn!(error = %e, message_type = ?message.message_type(), "failed to encode outbound message");
                let Some(fallback) = encode_failure_completion(&codec, &message, &e) else {
                    continue;
                };
                fallback
            }
        };
        tx.send(frame).await?;
        metrics::inc_frames(Direction::Outbound);
        ping_at = next_ping(Instant::now());
        if closing {
            break;
        }
    }
    queues.close();
    Ok(())
}

/// Error completion replacing a completion that could not be encoded, so
/// the caller is not left waiting.
fn encode_failure_completion(
    codec: &ProtocolCodec,
    message: &HubMessage,
    err: &ProtocolError,
) -> Option<bytes::Bytes> {
    let HubMessage::Completion(completion) = message else {
        return None;
    };
    let fallback = HubMessage::completion_error(
        completion.invocation_id.clone(),
        format!("Failed to send the invocation result: {err}"),
    );
    codec.encode(&fallback).ok()
}

/// Bookkeeping for an invocation that has not completed.
struct Outstanding {
    cancel: CancellationToken,
    streaming: bool,
}

/// Per-connection dispatch state.
struct Session {
    handler: HubConnectionHandler,
    connection: Arc<Connection>,
    caller: PushHandle<HubMessage>,
    outstanding: Arc<DashMap<String, Outstanding>>,
    tasks: TaskTracker,
    parallel: Arc<Semaphore>,
    stopping: bool,
}

enum Flow {
    Continue,
    /// The client said goodbye.
    Closed,
}

impl Session {
    fn options(&self) -> &HubOptions { &self.handler.options }

    async fn run(
        mut self,
        codec: ProtocolCodec,
        mut rx: PipeReceiver,
        mut buffer: BytesMut,
    ) -> Result<(), HubError> {
        if let Some(hook) = self.handler.hub.on_connected.clone() {
            let ctx = self.context(None, self.connection.abort_token());
            if let Err(panic_msg) = crate::panic::catch_panic(hook(ctx)).await {
                let message = format!("on_connected hook panicked: {panic_msg}");
                self.send_close(Some(message.clone()), true).await;
                return Err(HubError::Handler(message));
            }
        }

        let result = self.read_loop(&codec, &mut rx, &mut buffer).await;
        let abort = self.connection.abort_token();
        match &result {
            _ if abort.is_cancelled() => {}
            Ok(()) if self.stopping => {
                self.send_close(None, false).await;
            }
            Ok(()) => {}
            Err(HubError::ProtocolViolation(message)) => {
                self.send_close(Some(message.clone()), true).await;
            }
            Err(e @ (HubError::Format(_) | HubError::Timeout { .. })) => {
                self.send_close(Some(format!("Connection closed with an error. {e}")), false)
                    .await;
            }
            Err(_) => {}
        }
        if !self.stopping {
            for entry in self.outstanding.iter() {
                entry.value().cancel.cancel();
            }
        }
        self.tasks.close();
        result
    }

    async fn read_loop(
        &mut self,
        codec: &ProtocolCodec,
        rx: &mut PipeReceiver,
        buffer: &mut BytesMut,
    ) -> Result<(), HubError> {
        let stop = self.connection.stop_token();
        let abort = self.connection.abort_token();
        let client_timeout = self.options().client_timeout_interval;
        // Transports that keep themselves alive are policed by the idle scan.
        let timeout_enabled = self
            .connection
            .transport()
            .is_none_or(|features| !features.inherent_keep_alive);
        let mut deadline = Instant::now() + client_timeout;
        let mut input_open = true;

        loop {
            while let Some(message) = codec.try_parse_message(buffer)? {
                metrics::inc_frames(Direction::Inbound);
                if let Flow::Closed = self.dispatch(message).await? {
                    return Ok(());
                }
            }
            tokio::select! {
                biased;
                () = abort.cancelled() => return Ok(()),
                () = stop.cancelled(), if !self.stopping => {
                    debug!(connection_id = %self.connection.id(), "stopping; waiting for in-flight invocations");
                    self.stopping = true;
                    self.tasks.close();
                }
                () = self.tasks.wait(), if self.stopping => return Ok(()),
                () = sleep_until(deadline), if timeout_enabled && input_open && !self.stopping => {
                    return Err(HubError::Timeout { what: "client", after: client_timeout });
                }
                frame = rx.recv(), if input_open => match frame {
                    Some(frame) => {
                        self.connection.touch();
                        deadline = Instant::now() + client_timeout;
                        buffer.extend_from_slice(&frame);
                    }
                    None if self.stopping => input_open = false,
                    None => {
                        debug!(connection_id = %self.connection.id(), "client went away");
                        return Ok(());
                    }
                },
            }
        }
    }

    fn context(&self, invocation_id: Option<String>, cancel: CancellationToken) -> HubCallContext {
        HubCallContext::new(
            Arc::clone(&self.connection),
            invocation_id,
            cancel,
            self.caller.clone(),
            self.handler.clients.clone(),
        )
    }

    async fn send_close(&self, error: Option<String>, urgent: bool) {
        let close = HubMessage::close(error, false);
        let sent = if urgent {
            self.caller.push_high_priority(close).await
        } else {
            self.caller.push_low_priority(close).await
        };
        if sent.is_err() {
            debug!(connection_id = %self.connection.id(), "connection closed before close message");
        }
    }

    async fn complete(&self, invocation_id: &str, outcome: CompletionOutcome) {
        let _ = self
            .caller
            .push_low_priority(HubMessage::completion(invocation_id, outcome))
            .await;
    }

    async fn dispatch(&mut self, message: HubMessage) -> Result<Flow, HubError> {
        trace!(
            connection_id = %self.connection.id(),
            message_type = ?message.message_type(),
            "hub message received"
        );
        match message {
            HubMessage::Invocation(invocation) => self.invoke(invocation).await?,
            HubMessage::StreamInvocation(invocation) => self.invoke_stream(invocation).await?,
            HubMessage::CancelInvocation(cancel) => {
                match self.outstanding.get(&cancel.invocation_id) {
                    Some(entry) if entry.streaming => entry.cancel.cancel(),
                    Some(_) => debug!(invocation_id = %cancel.invocation_id, "ignoring cancel of a non-streaming invocation"),
                    None => debug!(invocation_id = %cancel.invocation_id, "ignoring cancel of unknown invocation"),
                }
            }
            HubMessage::StreamItem(item) => {
                debug!(invocation_id = %item.invocation_id, "client stream items are not supported; ignored");
            }
            HubMessage::Ping => {}
            HubMessage::Close(close) => {
                debug!(connection_id = %self.connection.id(), error = ?close.error, "client closed the connection");
                return Ok(Flow::Closed);
            }
            other @ HubMessage::Completion(_) => {
                return Err(HubError::ProtocolViolation(format!(
                    "Unexpected message of type {:?} received.",
                    other.message_type()
                )));
            }
        }
        Ok(Flow::Continue)
    }

    /// Answer an invocation that will not run.
    async fn rejected(&self, invocation_id: Option<&str>, target: &str, reason: String) {
        match invocation_id {
            Some(id) => self.complete(id, CompletionOutcome::Error(reason)).await,
            None => debug!(%target, %reason, "fire-and-forget invocation dropped"),
        }
    }

    /// Checks shared by both invocation kinds, returning the resolved
    /// invoker.
    async fn admit(
        &self,
        invocation_id: Option<&str>,
        target: &str,
        streaming: bool,
    ) -> Option<Invoker> {
        if self.stopping {
            self.rejected(invocation_id, target, "The connection is closing.".to_owned())
                .await;
            return None;
        }
        let Some(invoker) = self.handler.hub.methods.get(target).cloned() else {
            match invocation_id {
                Some(_) => {
                    self.rejected(invocation_id, target, format!("Unknown method '{target}'"))
                        .await;
                }
                None => warn!(connection_id = %self.connection.id(), %target, "unknown method invoked"),
            }
            return None;
        };
        let reason = match (&invoker, streaming) {
            (Invoker::Stream(_), false) => Some(format!(
                "The client attempted to invoke the streaming '{target}' method with a non-streaming invocation."
            )),
            (Invoker::Method(_), true) => Some(format!(
                "The client attempted to invoke the non-streaming '{target}' method with a streaming invocation."
            )),
            _ => None,
        };
        if let Some(reason) = reason {
            self.rejected(invocation_id, target, reason).await;
            return None;
        }
        if let Some(id) = invocation_id
            && self.outstanding.contains_key(id)
        {
            self.rejected(invocation_id, target, format!("Invocation ID '{id}' is already in use."))
                .await;
            return None;
        }
        Some(invoker)
    }

    fn register(&self, invocation_id: Option<&str>, streaming: bool) -> CancellationToken {
        let cancel = self.connection.abort_token().child_token();
        if let Some(id) = invocation_id {
            self.outstanding.insert(
                id.to_owned(),
                Outstanding {
                    cancel: cancel.clone(),
                    streaming,
                },
            );
        }
        cancel
    }

    async fn invoke(&mut self, invocation: InvocationMessage) -> Result<(), HubError> {
        let InvocationMessage {
            invocation_id,
            target,
            arguments,
        } = invocation;
        let Some(Invoker::Method(method)) = self.admit(invocation_id.as_deref(), &target, false).await
        else {
            return Ok(());
        };
        metrics::inc_invocations(if invocation_id.is_some() {
            InvocationKind::Unary
        } else {
            InvocationKind::FireAndForget
        });
        let cancel = self.register(invocation_id.as_deref(), false);
        let ctx = self.context(invocation_id.clone(), cancel.clone());
        let parallel = Arc::clone(&self.parallel);
        let outstanding = Arc::clone(&self.outstanding);
        let caller = self.caller.clone();
        let detailed = self.options().enable_detailed_errors;

        self.tasks.spawn(async move {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = parallel.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                if let Some(id) = &invocation_id {
                    outstanding.remove(id);
                }
                return;
            };
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                res = crate::panic::catch_panic(method(ctx, arguments)) => Some(res),
            };
            let Some(id) = invocation_id else {
                match result {
                    Some(Ok(Err(e))) => debug!(%target, error = %e, "fire-and-forget invocation failed"),
                    Some(Err(panic_msg)) => log_panic(&target, None, &panic_msg),
                    _ => {}
                }
                return;
            };
            outstanding.remove(&id);
            let outcome = match result {
                None => return,
                Some(Ok(Ok(Some(value)))) => CompletionOutcome::Result(value),
                Some(Ok(Ok(None))) => CompletionOutcome::Void,
                Some(Ok(Err(e))) => {
                    debug!(%target, invocation_id = %id, error = %e, "invocation failed");
                    CompletionOutcome::Error(e.client_message(&target, detailed))
                }
                Some(Err(panic_msg)) => {
                    log_panic(&target, Some(&id), &panic_msg);
                    CompletionOutcome::Error(panic_message(&target, detailed, &panic_msg))
                }
            };
            let _ = caller
                .push_low_priority(HubMessage::completion(id, outcome))
                .await;
        });
        Ok(())
    }

    async fn invoke_stream(&mut self, invocation: StreamInvocationMessage) -> Result<(), HubError> {
        let StreamInvocationMessage {
            invocation_id: id,
            target,
            arguments,
        } = invocation;
        let Some(Invoker::Stream(producer)) = self.admit(Some(&id), &target, true).await else {
            return Ok(());
        };
        metrics::inc_invocations(InvocationKind::Stream);
        let cancel = self.register(Some(&id), true);
        let ctx = self.context(Some(id.clone()), cancel.clone());
        let outstanding = Arc::clone(&self.outstanding);
        let caller = self.caller.clone();
        let detailed = self.options().enable_detailed_errors;

        self.tasks.spawn(async move {
            let outcome =
                stream_items(&caller, &id, &target, detailed, &cancel, || producer(ctx, arguments))
                    .await;
            outstanding.remove(&id);
            if let Some(outcome) = outcome {
                let _ = caller
                    .push_low_priority(HubMessage::completion(id, outcome))
                    .await;
            } else {
                debug!(invocation_id = %id, %target, "stream cancelled");
            }
        });
        Ok(())
    }
}

/// Pump a stream's items to the caller. Returns the completion to send, or
/// `None` if the stream was cancelled or the caller went away.
async fn stream_items<P>(
    caller: &PushHandle<HubMessage>,
    id: &str,
    target: &str,
    detailed: bool,
    cancel: &CancellationToken,
    producer: P,
) -> Option<CompletionOutcome>
where
    P: FnOnce() -> super::HandlerResult<futures::stream::BoxStream<'static, super::HandlerResult<Value>>>,
{
    let mut items = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(producer)) {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => return Some(CompletionOutcome::Error(e.client_message(target, detailed))),
        Err(panic) => {
            let panic_msg = crate::panic::format_panic(panic);
            log_panic(target, Some(id), &panic_msg);
            return Some(CompletionOutcome::Error(panic_message(target, detailed, &panic_msg)));
        }
    };
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            next = crate::panic::catch_panic(items.next()) => next,
        };
        match next {
            Ok(Some(Ok(item))) => {
                let pushed = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return None,
                    res = caller.push_low_priority(HubMessage::stream_item(id, item)) => res,
                };
                if pushed.is_err() {
                    return None;
                }
            }
            Ok(Some(Err(e))) => {
                debug!(%target, invocation_id = %id, error = %e, "stream failed");
                return Some(CompletionOutcome::Error(e.client_message(target, detailed)));
            }
            Ok(None) => return Some(CompletionOutcome::Void),
            Err(panic_msg) => {
                log_panic(target, Some(id), &panic_msg);
                return Some(CompletionOutcome::Error(panic_message(target, detailed, &panic_msg)));
            }
        }
    }
}

fn log_panic(target: &str, invocation_id: Option<&str>, panic_msg: &crate::panic::PanicMessage) {
    metrics::inc_errors("panic");
    error!("hub method panicked: panic={panic_msg}, target={target}, invocation_id={invocation_id:?}");
    tracing::error!(panic = %panic_msg, %target, ?invocation_id, "hub method panicked");
}

fn panic_message(target: &str, detailed: bool, panic_msg: &crate::panic::PanicMessage) -> String {
    if detailed {
        format!("An unexpected error occurred invoking '{target}' on the server. {panic_msg}")
    } else {
        format!("An unexpected error occurred invoking '{target}' on the server.")
    }
}
