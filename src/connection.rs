//! Per-connection state shared between the transport, the dispatcher and
//! the [`ConnectionManager`](crate::manager::ConnectionManager).

use std::{
    any::{Any, TypeId},
    fmt,
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::transport::{TransportFeatures, TransportKind};

/// Opaque, unguessable connection identifier.
///
/// Rendered as 32 lowercase hex digits of a random (v4) UUID drawn from the
/// operating system's CSPRNG, so identifiers are never reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Draw a fresh identifier.
    #[must_use]
    pub fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self { Self(value.to_owned()) }
}

/// Why a connection was aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// Removed from the manager explicitly.
    Removed,
    /// The server is shutting down and the drain period ran out.
    Shutdown,
    /// The idle scan found no activity within the liveness timeout.
    TimedOut,
    /// The transport failed.
    TransportFailed,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Removed => "removed",
            Self::Shutdown => "server shutdown",
            Self::TimedOut => "timed out",
            Self::TransportFailed => "transport failed",
        })
    }
}

/// Errors raised by connection operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("a {0} transport is already attached")]
    TransportAlreadyAttached(TransportKind),
    #[error("unknown connection token")]
    NotFound,
}

/// A logical connection.
///
/// Owned by the manager's registry; the transport and dispatcher hold
/// `Arc` clones for as long as they run.
pub struct Connection {
    id: ConnectionId,
    token: String,
    negotiate_version: u32,
    created: Instant,
    last_seen: Mutex<Instant>,
    held: AtomicUsize,
    transport: OnceLock<TransportFeatures>,
    items: DashMap<String, Value>,
    features: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    stop: CancellationToken,
    abort: CancellationToken,
    abort_reason: OnceLock<AbortReason>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("negotiate_version", &self.negotiate_version)
            .field("transport", &self.transport.get())
            .field("stopping", &self.stop.is_cancelled())
            .field("abort_reason", &self.abort_reason.get())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection. Negotiate version 0 clients route by id, so the
    /// token equals the id; later versions get a separate secret token.
    #[must_use]
    pub fn new(negotiate_version: u32) -> Self {
        let id = ConnectionId::generate();
        let token = if negotiate_version == 0 {
            id.as_str().to_owned()
        } else {
            Uuid::new_v4().simple().to_string()
        };
        let now = Instant::now();
        Self {
            id,
            token,
            negotiate_version,
            created: now,
            last_seen: Mutex::new(now),
            held: AtomicUsize::new(0),
            transport: OnceLock::new(),
            items: DashMap::new(),
            features: DashMap::new(),
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            abort_reason: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId { &self.id }

    /// Secret key HTTP transports use to find this connection.
    #[must_use]
    pub fn token(&self) -> &str { &self.token }

    #[must_use]
    pub fn negotiate_version(&self) -> u32 { self.negotiate_version }

    #[must_use]
    pub fn created(&self) -> Instant { self.created }

    /// Record activity from the peer.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    #[must_use]
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the peer was last heard from. Zero while a
    /// [`LivenessGuard`] is held.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        if self.is_held() {
            return Duration::ZERO;
        }
        now.saturating_duration_since(self.last_seen())
    }

    /// Treat the peer as live until the returned guard drops, e.g. while a
    /// long poll is parked. Dropping the guard counts as activity.
    #[must_use]
    pub fn hold_alive(self: &Arc<Self>) -> LivenessGuard {
        self.held.fetch_add(1, Ordering::AcqRel);
        self.touch();
        LivenessGuard { connection: Arc::clone(self) }
    }

    /// Whether a [`LivenessGuard`] is outstanding.
    #[must_use]
    pub fn is_held(&self) -> bool { self.held.load(Ordering::Acquire) > 0 }

    /// Record the transport serving this connection. A connection has
    /// exactly one transport for its lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::TransportAlreadyAttached`] on a second
    /// attach.
    pub fn attach_transport(&self, features: TransportFeatures) -> Result<(), ConnectionError> {
        self.transport
            .set(features)
            .map_err(|_| {
                ConnectionError::TransportAlreadyAttached(
                    self.transport.get().map_or(features.kind, |f| f.kind),
                )
            })?;
        self.insert_feature(features);
        Ok(())
    }

    /// Features of the attached transport.
    #[must_use]
    pub fn transport(&self) -> Option<TransportFeatures> { self.transport.get().copied() }

    /// Connection-scoped key/value bag for application use.
    #[must_use]
    pub fn items(&self) -> &DashMap<String, Value> { &self.items }

    /// Register a capability, replacing any previous value of the same type.
    pub fn insert_feature<T: Any + Send + Sync>(&self, feature: T) {
        self.features.insert(TypeId::of::<T>(), Arc::new(feature));
    }

    /// Look up a capability by type.
    #[must_use]
    pub fn feature<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entry = self.features.get(&TypeId::of::<T>())?;
        Arc::clone(entry.value()).downcast::<T>().ok()
    }

    /// Ask the connection to wind down gracefully.
    pub fn stop(&self) { self.stop.cancel(); }

    /// Cancelled once a graceful stop (or an abort) is requested.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken { self.stop.clone() }

    #[must_use]
    pub fn is_stopping(&self) -> bool { self.stop.is_cancelled() }

    /// Tear the connection down immediately.
    ///
    /// Returns `false` if it had already been aborted; the first reason is
    /// kept.
    pub fn abort(&self, reason: AbortReason) -> bool {
        if self.abort_reason.set(reason).is_err() {
            return false;
        }
        self.abort.cancel();
        self.stop.cancel();
        true
    }

    /// Cancelled when the connection is aborted.
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken { self.abort.clone() }

    #[must_use]
    pub fn abort_reason(&self) -> Option<AbortReason> { self.abort_reason.get().copied() }

    #[must_use]
    pub fn is_aborted(&self) -> bool { self.abort.is_cancelled() }
}

/// Keeps a connection off the idle scan's list; see
/// [`Connection::hold_alive`].
#[derive(Debug)]
pub struct LivenessGuard {
    connection: Arc<Connection>,
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        self.connection.touch();
        self.connection.held.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::transport::TransferFormat;

    #[rstest]
    #[case::v0(0, true)]
    #[case::v1(1, false)]
    fn token_matches_id_only_for_version_zero(#[case] version: u32, #[case] same: bool) {
        let connection = Connection::new(version);
        assert_eq!(connection.token() == connection.id().as_str(), same);
        assert_eq!(connection.id().as_str().len(), 32);
        assert!(connection.id().as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn identifiers_are_unique() {
        let ids: std::collections::HashSet<_> =
            (0..1000).map(|_| ConnectionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn transport_attaches_once() {
        let connection = Connection::new(1);
        let ws = TransportFeatures::new(TransportKind::WebSockets, TransferFormat::Text);
        connection.attach_transport(ws).expect("first attach");
        let lp = TransportFeatures::new(TransportKind::LongPolling, TransferFormat::Text);
        assert_eq!(
            connection.attach_transport(lp),
            Err(ConnectionError::TransportAlreadyAttached(TransportKind::WebSockets))
        );
        assert_eq!(connection.transport(), Some(ws));
        assert_eq!(connection.feature::<TransportFeatures>().as_deref(), Some(&ws));
    }

    #[test]
    fn first_abort_reason_wins() {
        let connection = Connection::new(1);
        assert!(connection.abort(AbortReason::TimedOut));
        assert!(!connection.abort(AbortReason::Removed));
        assert_eq!(connection.abort_reason(), Some(AbortReason::TimedOut));
        assert!(connection.is_aborted());
        assert!(connection.is_stopping(), "abort implies stop");
    }

    #[test]
    fn items_are_connection_scoped() {
        let a = Connection::new(1);
        let b = Connection::new(1);
        a.items().insert("user".into(), Value::from("alice"));
        assert_eq!(a.items().get("user").map(|v| v.clone()), Some(Value::from("alice")));
        assert!(b.items().get("user").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_clock() {
        let connection = Connection::new(1);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(connection.idle_for(Instant::now()), Duration::from_secs(10));
        connection.touch();
        assert_eq!(connection.idle_for(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn held_connection_is_never_idle() {
        let connection = Arc::new(Connection::new(1));
        let guard = connection.hold_alive();
        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(connection.is_held());
        assert_eq!(connection.idle_for(Instant::now()), Duration::ZERO);

        drop(guard);
        assert!(!connection.is_held());
        assert_eq!(connection.idle_for(Instant::now()), Duration::ZERO);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(connection.idle_for(Instant::now()), Duration::from_secs(5));
    }
}
