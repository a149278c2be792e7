//! Registry of connected callers for server-initiated invocations.
//!
//! `HubClients` stores non-owning weak references to each connection's
//! [`PushHandle`], so hub methods can reach other connections without keeping
//! them alive. Dead entries are pruned lazily at lookup time.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde_json::Value;

use crate::{
    connection::ConnectionId,
    protocol::HubMessage,
    push::{PushError, PushHandle, PushHandleInner, PushPolicy, PushPriority},
};

/// Shared registry of live connections' outbound handles.
#[derive(Clone, Default)]
pub struct HubClients(Arc<DashMap<ConnectionId, Weak<PushHandleInner<HubMessage>>>>);

impl std::fmt::Debug for HubClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClients").field("len", &self.0.len()).finish()
    }
}

impl HubClients {
    /// Outbound handle for `id` if the connection is still alive.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<PushHandle<HubMessage>> {
        let guard = self.0.get(id);
        let handle = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if handle.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        handle.map(PushHandle::from_arc)
    }

    pub(crate) fn insert(&self, id: ConnectionId, handle: &PushHandle<HubMessage>) {
        self.0.insert(id, handle.downgrade());
    }

    pub(crate) fn remove(&self, id: &ConnectionId) { self.0.remove(id); }

    /// IDs of connections that are still alive, pruning dead entries.
    #[must_use]
    pub fn active_ids(&self) -> Vec<ConnectionId> {
        let mut ids = Vec::with_capacity(self.0.len());
        self.0.retain(|id, weak| {
            if weak.strong_count() > 0 {
                ids.push(id.clone());
                true
            } else {
                false
            }
        });
        ids
    }

    /// Invoke `target` on one connection without expecting a reply, waiting
    /// for queue capacity.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] if the connection is gone.
    pub async fn send_to(
        &self,
        id: &ConnectionId,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<(), PushError> {
        let handle = self.get(id).ok_or(PushError::Closed)?;
        handle
            .push_low_priority(HubMessage::invocation(None, target, arguments))
            .await
    }

    /// Invoke `target` on every live connection except `except`.
    ///
    /// Never waits: a connection whose queue is full misses the message and
    /// a warning is logged. Returns the number of connections reached.
    pub fn broadcast_except(
        &self,
        except: Option<&ConnectionId>,
        target: &str,
        arguments: &[Value],
    ) -> usize {
        let mut handles = Vec::with_capacity(self.0.len());
        self.0.retain(|id, weak| match weak.upgrade() {
            Some(inner) => {
                if except != Some(id) {
                    handles.push(PushHandle::from_arc(inner));
                }
                true
            }
            None => false,
        });
        handles
            .into_iter()
            .filter(|handle| {
                let message = HubMessage::invocation(None, target, arguments.to_vec());
                handle
                    .try_push(message, PushPriority::Low, PushPolicy::WarnAndDropIfFull)
                    .is_ok()
            })
            .count()
    }

    /// Invoke `target` on every live connection.
    pub fn broadcast(&self, target: &str, arguments: &[Value]) -> usize {
        self.broadcast_except(None, target, arguments)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::push::PushQueues;

    fn connected(clients: &HubClients) -> (ConnectionId, PushQueues<HubMessage>, PushHandle<HubMessage>) {
        let (queues, handle) = PushQueues::builder().build().expect("queues");
        let id = ConnectionId::generate();
        clients.insert(id.clone(), &handle);
        (id, queues, handle)
    }

    #[tokio::test]
    async fn send_to_reaches_only_the_target() {
        let clients = HubClients::default();
        let (a, mut qa, _ha) = connected(&clients);
        let (_b, mut qb, _hb) = connected(&clients);
        clients
            .send_to(&a, "Notify", vec![json!(1)])
            .await
            .expect("send");
        let (_, message) = qa.recv().await.expect("message");
        assert_eq!(message, HubMessage::invocation(None, "Notify", vec![json!(1)]));
        assert!(qb.try_recv().is_none());
    }

    #[tokio::test]
    async fn dead_connections_are_pruned() {
        let clients = HubClients::default();
        let (a, _qa, ha) = connected(&clients);
        let (b, _qb, _hb) = connected(&clients);
        drop(ha);
        assert!(clients.get(&a).is_none());
        assert_eq!(clients.active_ids(), vec![b]);
        assert_eq!(
            clients.send_to(&a, "Notify", Vec::new()).await,
            Err(PushError::Closed)
        );
    }

    #[tokio::test]
    async fn broadcast_skips_the_excluded_connection() {
        let clients = HubClients::default();
        let (a, mut qa, _ha) = connected(&clients);
        let (_b, mut qb, _hb) = connected(&clients);
        assert_eq!(clients.broadcast_except(Some(&a), "Tick", &[]), 1);
        assert!(qa.try_recv().is_none());
        assert!(qb.try_recv().is_some());
        assert_eq!(clients.broadcast("Tick", &[]), 2);
    }
}
