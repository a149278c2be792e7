//! Items of a server-streamed invocation.

use std::{
    marker::PhantomData,
    pin::Pin,
    sync::Weak,
    task::{Context, Poll},
};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ClientError, session::Session};
use crate::{
    protocol::HubMessage,
    push::{PushPolicy, PushPriority},
};

/// Typed items produced by a streaming hub method.
///
/// The stream ends after the server's completion. A failed stream yields
/// one final error. Dropping the stream before it ends asks the server to
/// cancel the invocation.
pub struct HubStream<T> {
    rx: mpsc::Receiver<Result<Value, ClientError>>,
    invocation_id: String,
    session: Weak<Session>,
    _item: PhantomData<fn() -> T>,
}

impl<T> HubStream<T> {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<Value, ClientError>>,
        invocation_id: String,
        session: Weak<Session>,
    ) -> Self {
        Self {
            rx,
            invocation_id,
            session,
            _item: PhantomData,
        }
    }

    #[must_use]
    pub fn invocation_id(&self) -> &str { &self.invocation_id }
}

impl<T: DeserializeOwned> Stream for HubStream<T> {
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx).map(|item| {
            item.map(|result| result.and_then(|value| Ok(serde_json::from_value(value)?)))
        })
    }
}

impl<T> Drop for HubStream<T> {
    fn drop(&mut self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if session.pending.remove(&self.invocation_id).is_none() {
            return;
        }
        let cancel = HubMessage::cancel(self.invocation_id.clone());
        if session
            .outbound
            .try_push(cancel, PushPriority::Low, PushPolicy::WarnAndDropIfFull)
            .is_err()
        {
            tracing::debug!(invocation_id = %self.invocation_id, "connection gone; stream not cancelled");
        }
    }
}
