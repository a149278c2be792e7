//! Explicit per-call context handed to hub methods.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::HubClients;
use crate::{
    connection::{Connection, ConnectionId},
    protocol::HubMessage,
    push::{PushError, PushHandle},
};

/// What a hub method knows about the call it is serving.
#[derive(Clone, Debug)]
pub struct HubCallContext {
    connection: Arc<Connection>,
    invocation_id: Option<String>,
    cancellation: CancellationToken,
    caller: PushHandle<HubMessage>,
    clients: HubClients,
}

impl HubCallContext {
    pub(crate) fn new(
        connection: Arc<Connection>,
        invocation_id: Option<String>,
        cancellation: CancellationToken,
        caller: PushHandle<HubMessage>,
        clients: HubClients,
    ) -> Self {
        Self {
            connection,
            invocation_id,
            cancellation,
            caller,
            clients,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> { &self.connection }

    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId { self.connection.id() }

    /// `None` for fire-and-forget calls and lifecycle hooks.
    #[must_use]
    pub fn invocation_id(&self) -> Option<&str> { self.invocation_id.as_deref() }

    /// Cancelled when the caller cancels the invocation or the connection
    /// aborts.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken { &self.cancellation }

    #[must_use]
    pub fn is_cancelled(&self) -> bool { self.cancellation.is_cancelled() }

    /// Outbound handle of the calling connection.
    #[must_use]
    pub fn caller(&self) -> &PushHandle<HubMessage> { &self.caller }

    /// Every connection served by this hub.
    #[must_use]
    pub fn clients(&self) -> &HubClients { &self.clients }

    /// Invoke `target` on the caller without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] once the caller has disconnected.
    pub async fn send_caller(&self, target: &str, arguments: Vec<Value>) -> Result<(), PushError> {
        self.caller
            .push_low_priority(HubMessage::invocation(None, target, arguments))
            .await
    }
}
