//! Registry of live connections.
//!
//! [`ConnectionManager`] hands out connections during negotiation, resolves
//! the `?id=` token of HTTP transport requests, runs each connection's
//! supervision task and tears connections down on removal, idle timeout or
//! server shutdown. The registry is a [`DashMap`] so lookups and removals on
//! different connections never contend on one lock.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use log::{error, info};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use crate::{
    connection::{AbortReason, Connection, ConnectionId},
    transport::TransportKind,
};

mod negotiate;

pub use negotiate::{AvailableTransport, MAX_NEGOTIATE_VERSION, NegotiateResponse};

/// Tunables for a [`ConnectionManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionManagerOptions {
    /// Connections silent for longer than this are removed by the idle scan.
    pub liveness_timeout: Duration,
    /// Period of the idle scan.
    pub scan_interval: Duration,
    /// Grace period granted to connections during shutdown.
    pub drain_timeout: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for ConnectionManagerOptions {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(30),
            scan_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

impl ConnectionManagerOptions {
    #[must_use]
    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    #[must_use]
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Lifecycle notification broadcast by the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Created(ConnectionId),
    Removed {
        id: ConnectionId,
        reason: AbortReason,
    },
}

/// Outcome of [`ConnectionManager::shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connection tasks that wound down on their own once shutdown began.
    pub drained: usize,
    /// Connections aborted once the drain period ran out.
    pub aborted: usize,
}

struct Inner {
    connections: DashMap<String, Arc<Connection>>,
    tracker: TaskTracker,
    events: broadcast::Sender<ConnectionEvent>,
    options: ConnectionManagerOptions,
    shutdown: CancellationToken,
    drained: AtomicUsize,
}

/// Shared registry of connections, keyed by connection token.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.inner.connections.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self { Self::new(ConnectionManagerOptions::default()) }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(options: ConnectionManagerOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                connections: DashMap::new(),
                tracker: TaskTracker::new(),
                events,
                options,
                shutdown: CancellationToken::new(),
                drained: AtomicUsize::new(0),
            }),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionManagerOptions { &self.inner.options }

    /// Register a new connection for a client speaking `negotiate_version`.
    pub fn create_connection(&self, negotiate_version: u32) -> Arc<Connection> {
        loop {
            let connection = Arc::new(Connection::new(negotiate_version));
            match self.inner.connections.entry(connection.token().to_owned()) {
                // Tokens are random; a collision only means drawing again.
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&connection));
                }
            }
            // Latecomers join the drain already in progress.
            if self.inner.shutdown.is_cancelled() {
                connection.stop();
            }
            crate::metrics::inc_connections();
            info!(
                "connection created: connection_id={}, negotiate_version={negotiate_version}",
                connection.id()
            );
            let _ = self
                .inner
                .events
                .send(ConnectionEvent::Created(connection.id().clone()));
            return connection;
        }
    }

    /// Create a connection and describe it for the negotiate reply.
    ///
    /// Versions above [`MAX_NEGOTIATE_VERSION`] are answered with the highest
    /// version supported.
    pub fn negotiate(
        &self,
        requested_version: u32,
        transports: &[TransportKind],
    ) -> (Arc<Connection>, NegotiateResponse) {
        let connection = self.create_connection(requested_version.min(MAX_NEGOTIATE_VERSION));
        let response = NegotiateResponse::for_connection(&connection, transports);
        (connection, response)
    }

    /// Look up a connection by its token.
    #[must_use]
    pub fn try_get_connection(&self, token: &str) -> Option<Arc<Connection>> {
        self.inner
            .connections
            .get(token)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Deregister and abort the connection behind `token`.
    ///
    /// Returns `false` if it was not registered.
    pub fn remove_connection(&self, token: &str) -> bool {
        self.remove_with(token, AbortReason::Removed)
    }

    fn remove_with(&self, token: &str, reason: AbortReason) -> bool {
        let Some((_, connection)) = self.inner.connections.remove(token) else {
            return false;
        };
        connection.abort(reason);
        let reason = connection.abort_reason().unwrap_or(reason);
        crate::metrics::dec_connections();
        info!(
            "connection removed: connection_id={}, reason={reason}",
            connection.id()
        );
        let _ = self.inner.events.send(ConnectionEvent::Removed {
            id: connection.id().clone(),
            reason,
        });
        true
    }

    /// Run `task` as `connection`'s supervision task, removing the
    /// connection once it ends. Panics are logged and contained.
    pub fn track<F>(&self, connection: &Arc<Connection>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let manager = self.clone();
        let connection = Arc::clone(connection);
        self.inner.tracker.spawn(async move {
            if let Err(panic_msg) = crate::panic::catch_panic(task).await {
                let connection_id = connection.id();
                crate::metrics::inc_errors("panic");
                error!("connection task panicked: panic={panic_msg}, connection_id={connection_id}");
                tracing::error!(panic = %panic_msg, %connection_id, "connection task panicked");
                connection.abort(AbortReason::TransportFailed);
            }
            let reason = connection.abort_reason();
            if reason.is_none() && manager.inner.shutdown.is_cancelled() {
                manager.inner.drained.fetch_add(1, Ordering::AcqRel);
            }
            manager.remove_with(connection.token(), reason.unwrap_or(AbortReason::Removed));
        })
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> { self.inner.events.subscribe() }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize { self.inner.connections.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.inner.connections.is_empty() }

    /// Snapshot of every registered connection.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Cancelled once [`ConnectionManager::shutdown`] starts.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.inner.shutdown.clone() }

    /// Stop every connection and wait for them to finish.
    ///
    /// Connections get `drain_timeout` to wind down; whatever is still
    /// running after that is aborted with [`AbortReason::Shutdown`]. Returns
    /// once every tracked task has finished.
    pub async fn shutdown(&self, drain_timeout: Duration) -> ShutdownReport {
        self.inner.shutdown.cancel();
        for connection in self.connections() {
            connection.stop();
        }
        self.inner.tracker.close();

        let mut report = ShutdownReport::default();
        if tokio::time::timeout(drain_timeout, self.inner.tracker.wait())
            .await
            .is_err()
        {
            for connection in self.connections() {
                if connection.abort(AbortReason::Shutdown) {
                    report.aborted += 1;
                }
            }
            self.inner.tracker.wait().await;
        }
        // Connections never handed to `track` have no task to wait for.
        for connection in self.connections() {
            self.remove_with(connection.token(), AbortReason::Shutdown);
        }
        report.drained = self.inner.drained.load(Ordering::Acquire);
        info!(
            "shutdown complete: drained={}, aborted={}",
            report.drained, report.aborted
        );
        report
    }

    /// Spawn the periodic sweep removing connections idle for longer than
    /// the liveness timeout. The task ends when shutdown starts.
    pub fn spawn_idle_scan(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let options = self.inner.options;
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(options.scan_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.sweep_idle(options.liveness_timeout, Instant::now());
                        if removed > 0 {
                            debug!(removed, "idle scan removed connections");
                        }
                    }
                }
            }
        })
    }

    /// Remove every connection idle for longer than `liveness_timeout` at
    /// `now`. Returns the number removed.
    pub fn sweep_idle(&self, liveness_timeout: Duration, now: Instant) -> usize {
        // Collect first; removing while iterating would deadlock the shard.
        let stale: Vec<String> = self
            .inner
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for(now) > liveness_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        stale
            .iter()
            .filter(|token| self.remove_with(token, AbortReason::TimedOut))
            .count()
    }
}
