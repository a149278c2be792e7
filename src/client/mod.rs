//! Hub client.
//!
//! [`HubClient`] calls hub methods on a server and runs client methods the
//! server invokes. It reaches the server through a [`Connector`], performs
//! the handshake, keeps the connection alive with pings and watches the
//! server timeout.
//!
//! When the connection is lost unexpectedly (transport failure, server
//! timeout, or a `Close` allowing reconnect) every outstanding call fails
//! with [`ClientError::ConnectionLost`] and the client reconnects following
//! its [`RetryPolicy`]. Once the retry budget is spent the client enters
//! [`HubConnectionState::Failed`] and stays there until started again. The
//! connection id may differ after a reconnect.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use log::{error, info, warn};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

mod connector;
mod error;
mod reconnect;
mod session;
mod stream;

pub use connector::{ClientConnection, Connector, InProcessConnector, WebSocketConnector};
pub use error::ClientError;
pub use reconnect::{ExponentialBackoff, FixedDelays, ReconnectPhase, ReconnectState, RetryPolicy};
use session::{Driver, Ended, Pending, Session};
pub use stream::HubStream;

use crate::{
    codec::DEFAULT_MAX_MESSAGE_SIZE,
    protocol::{
        HandshakeCodec,
        HandshakeRequest,
        HandshakeResponse,
        HubMessage,
        HubProtocol,
        JsonHubProtocol,
        ProtocolCodec,
    },
    push::PushQueues,
    transport::PipeEnd,
};

/// Observable connection state of a [`HubClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts were exhausted.
    Failed,
}

/// Handler for a client method invoked by the server.
pub type ClientMethod = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Client timing and sizing settings.
#[derive(Clone, Copy, Debug)]
pub struct ClientOptions {
    /// Ping interval when nothing else was sent.
    pub keep_alive_interval: Duration,
    /// Silence from the server after which the connection is lost.
    pub server_timeout: Duration,
    pub handshake_timeout: Duration,
    pub maximum_message_size: usize,
    /// Stream items buffered before the connection stops reading.
    pub stream_buffer_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            maximum_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stream_buffer_capacity: 64,
        }
    }
}

/// Builder for [`HubClient`].
pub struct HubClientBuilder {
    connector: Arc<dyn Connector>,
    protocol: Arc<dyn HubProtocol>,
    retry: Option<Arc<dyn RetryPolicy>>,
    options: ClientOptions,
    handlers: HashMap<String, ClientMethod>,
}

impl HubClientBuilder {
    /// Protocol requested in the handshake. Defaults to JSON.
    #[must_use]
    pub fn protocol(mut self, protocol: Arc<dyn HubProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    /// Reconnect with `policy` after unexpected loss.
    #[must_use]
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(policy));
        self
    }

    /// Never reconnect; a lost connection leaves the client disconnected.
    #[must_use]
    pub fn without_reconnect(mut self) -> Self {
        self.retry = None;
        self
    }

    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.options.keep_alive_interval = interval;
        self
    }

    #[must_use]
    pub fn server_timeout(mut self, timeout: Duration) -> Self {
        self.options.server_timeout = timeout;
        self
    }

    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    /// Register `handler` for server calls to `target`.
    #[must_use]
    pub fn on<F>(mut self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.handlers.insert(target.into(), Arc::new(handler));
        self
    }

    #[must_use]
    pub fn build(self) -> HubClient {
        let (state, _) = watch::channel(HubConnectionState::Disconnected);
        HubClient {
            shared: Arc::new(Shared {
                connector: self.connector,
                protocol: self.protocol,
                retry: self.retry,
                options: self.options,
                handlers: Arc::new(self.handlers),
                state,
                session: Mutex::new(None),
                run: tokio::sync::Mutex::new(None),
                next_invocation: AtomicU64::new(0),
            }),
        }
    }
}

impl fmt::Debug for HubClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubClientBuilder")
            .field("connector", &self.connector)
            .field("protocol", &self.protocol.name())
            .field("retry", &self.retry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A running supervisor and the token stopping it.
struct Run {
    stop: CancellationToken,
    supervisor: JoinHandle<()>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    protocol: Arc<dyn HubProtocol>,
    retry: Option<Arc<dyn RetryPolicy>>,
    options: ClientOptions,
    handlers: Arc<HashMap<String, ClientMethod>>,
    state: watch::Sender<HubConnectionState>,
    session: Mutex<Option<Arc<Session>>>,
    /// Serialises `start` and `stop`.
    run: tokio::sync::Mutex<Option<Run>>,
    next_invocation: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: HubConnectionState) { self.state.send_replace(state); }

    fn session_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<Session>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Result<Arc<Session>, ClientError> {
        self.session_slot().clone().ok_or(ClientError::NotConnected)
    }

    fn next_invocation_id(&self) -> String {
        (self.next_invocation.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Connect, handshake and spawn the connection's driver.
    async fn connect(&self, stop: &CancellationToken) -> Result<JoinHandle<Ended>, ClientError> {
        let ClientConnection {
            connection_id,
            mut pipe,
        } = self
            .connector
            .connect(self.protocol.transfer_format())
            .await?;
        let handshake = HandshakeCodec::new(self.options.maximum_message_size);
        let request = HandshakeRequest::new(self.protocol.name(), self.protocol.version());
        pipe.send(handshake.encode_request(&request)?).await?;
        let mut buffer = BytesMut::new();
        let response = timeout(
            self.options.handshake_timeout,
            read_handshake(&handshake, &mut pipe, &mut buffer),
        )
        .await
        .map_err(|_| ClientError::Timeout("handshake"))??;
        if let Some(error) = response.error {
            return Err(ClientError::Handshake(error));
        }

        let (queues, outbound) = PushQueues::builder()
            .build()
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        let session = Arc::new(Session::new(connection_id, outbound));
        info!(
            "hub client connected: connection_id={}, protocol={}",
            session.connection_id.as_deref().unwrap_or("-"),
            self.protocol.name()
        );
        *self.session_slot() = Some(Arc::clone(&session));
        let driver = Driver {
            session,
            codec: ProtocolCodec::new(Arc::clone(&self.protocol), self.options.maximum_message_size),
            pipe,
            buffer,
            queues,
            handlers: Arc::clone(&self.handlers),
            keep_alive_interval: self.options.keep_alive_interval,
            server_timeout: self.options.server_timeout,
            stop: stop.clone(),
        };
        Ok(tokio::spawn(driver.run()))
    }
}

async fn read_handshake(
    codec: &HandshakeCodec,
    pipe: &mut PipeEnd,
    buffer: &mut BytesMut,
) -> Result<HandshakeResponse, ClientError> {
    loop {
        if let Some(response) = codec.try_parse_response(buffer)? {
            return Ok(response);
        }
        match pipe.recv().await {
            Some(frame) => buffer.extend_from_slice(&frame),
            None => return Err(ClientError::ConnectionLost),
        }
    }
}

/// Wait for each connection to end and reconnect when allowed.
async fn supervise(shared: Arc<Shared>, mut driver: JoinHandle<Ended>, stop: CancellationToken) {
    let max_attempts = shared.retry.as_ref().map_or(0, |policy| policy.max_attempts());
    let mut machine = ReconnectState::new(max_attempts);
    machine.connected();
    loop {
        let ended = driver.await.unwrap_or_else(|e| {
            error!("client connection task failed: error={e}");
            Ended::Lost(ClientError::ConnectionLost)
        });
        *shared.session_slot() = None;
        let policy = shared
            .retry
            .clone()
            .filter(|_| ended.allows_reconnect() && !stop.is_cancelled());
        let Some(policy) = policy else {
            info!("hub client disconnected: reason={ended:?}");
            machine.stopped();
            shared.set_state(HubConnectionState::Disconnected);
            return;
        };
        warn!("hub client connection lost: reason={ended:?}");
        machine.connection_lost();
        shared.set_state(HubConnectionState::Reconnecting);
        driver = loop {
            let Some(attempt) = machine.next_attempt() else {
                error!("hub client reconnect failed: attempts={}", machine.retry_count());
                shared.set_state(HubConnectionState::Failed);
                return;
            };
            let delay = policy.delay(attempt);
            let connected = tokio::select! {
                () = stop.cancelled() => {
                    shared.set_state(HubConnectionState::Disconnected);
                    return;
                }
                res = async {
                    tokio::time::sleep(delay).await;
                    shared.connect(&stop).await
                } => res,
            };
            match connected {
                Ok(next) => {
                    machine.connected();
                    shared.set_state(HubConnectionState::Connected);
                    break next;
                }
                Err(e) => warn!("reconnect attempt failed: attempt={attempt}, error={e}"),
            }
        };
    }
}

/// Convert call arguments to the positional argument list. Tuples map to
/// their elements and `()` to no arguments.
fn to_arguments<A: Serialize>(arguments: A) -> Result<Vec<Value>, ClientError> {
    Ok(match serde_json::to_value(arguments)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// Connection to a hub.
///
/// Cloning yields another handle to the same connection. Call
/// [`HubClient::stop`] to end it; dropping every handle does not.
#[derive(Clone)]
pub struct HubClient {
    shared: Arc<Shared>,
}

impl fmt::Debug for HubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubClient")
            .field("state", &self.state())
            .field("connection_id", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl HubClient {
    /// Start configuring a client connecting through `connector`.
    #[must_use]
    pub fn builder(connector: impl Connector + 'static) -> HubClientBuilder {
        HubClientBuilder {
            connector: Arc::new(connector),
            protocol: Arc::new(JsonHubProtocol),
            retry: Some(Arc::new(ExponentialBackoff::default())),
            options: ClientOptions::default(),
            handlers: HashMap::new(),
        }
    }

    /// Connect and complete the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidState`] unless the client is
    /// disconnected or failed, or the connect or handshake failure.
    pub async fn start(&self) -> Result<(), ClientError> {
        let mut run = self.shared.run.lock().await;
        let state = self.state();
        if !matches!(
            state,
            HubConnectionState::Disconnected | HubConnectionState::Failed
        ) {
            return Err(ClientError::InvalidState(state));
        }
        if let Some(previous) = run.take() {
            let _ = previous.supervisor.await;
        }
        self.shared.set_state(HubConnectionState::Connecting);
        let stop = CancellationToken::new();
        let driver = match self.shared.connect(&stop).await {
            Ok(driver) => driver,
            Err(e) => {
                self.shared.set_state(HubConnectionState::Disconnected);
                return Err(e);
            }
        };
        self.shared.set_state(HubConnectionState::Connected);
        let supervisor = tokio::spawn(supervise(Arc::clone(&self.shared), driver, stop.clone()));
        *run = Some(Run { stop, supervisor });
        Ok(())
    }

    /// Close the connection and stop reconnecting.
    pub async fn stop(&self) {
        let mut run = self.shared.run.lock().await;
        if let Some(Run { stop, supervisor }) = run.take() {
            stop.cancel();
            if let Err(e) = supervisor.await
                && e.is_panic()
            {
                error!("client supervisor panicked: error={e}");
            }
        }
        self.shared.set_state(HubConnectionState::Disconnected);
    }

    /// Call `target` and wait for its result.
    ///
    /// `arguments` is usually a tuple; use `()` for none.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Invocation`] with the server's message when
    /// the method fails, [`ClientError::ConnectionLost`] when the connection
    /// ends first and [`ClientError::NotConnected`] without a connection.
    pub async fn invoke<A, R>(&self, target: &str, arguments: A) -> Result<R, ClientError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let session = self.shared.session()?;
        let arguments = to_arguments(arguments)?;
        let id = self.shared.next_invocation_id();
        let (tx, rx) = oneshot::channel();
        session.pending.insert(id.clone(), Pending::Invocation(tx));
        let message = HubMessage::invocation(Some(id.clone()), target, arguments);
        if session.outbound.push_low_priority(message).await.is_err() {
            session.pending.remove(&id);
            return Err(ClientError::ConnectionLost);
        }
        drop(session);
        let value = rx.await.map_err(|_| ClientError::ConnectionLost)??;
        Ok(serde_json::from_value(value.unwrap_or(Value::Null))?)
    }

    /// Call `target` without waiting for, or receiving, a result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] without a connection.
    pub async fn send<A: Serialize>(&self, target: &str, arguments: A) -> Result<(), ClientError> {
        let session = self.shared.session()?;
        let message = HubMessage::invocation(None, target, to_arguments(arguments)?);
        session
            .outbound
            .push_low_priority(message)
            .await
            .map_err(|_| ClientError::ConnectionLost)
    }

    /// Call the streaming method `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] without a connection.
    pub async fn stream<A, T>(&self, target: &str, arguments: A) -> Result<HubStream<T>, ClientError>
    where
        A: Serialize,
        T: DeserializeOwned,
    {
        let session = self.shared.session()?;
        let arguments = to_arguments(arguments)?;
        let id = self.shared.next_invocation_id();
        let (tx, rx) = mpsc::channel(self.shared.options.stream_buffer_capacity.max(1));
        session.pending.insert(id.clone(), Pending::Stream(tx));
        let message = HubMessage::stream_invocation(id.clone(), target, arguments);
        if session.outbound.push_low_priority(message).await.is_err() {
            session.pending.remove(&id);
            return Err(ClientError::ConnectionLost);
        }
        Ok(HubStream::new(rx, id, Arc::downgrade(&session)))
    }

    #[must_use]
    pub fn state(&self) -> HubConnectionState { *self.shared.state.borrow() }

    /// Receiver observing every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<HubConnectionState> { self.shared.state.subscribe() }

    /// Id of the current connection, when known.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.shared
            .session_slot()
            .as_ref()
            .and_then(|session| session.connection_id.clone())
    }
}
