//! Producer side of the push queues.

use std::sync::{Arc, Weak};

use leaky_bucket::RateLimiter;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{FrameLike, PushError, PushPolicy, PushPriority};

pub(crate) struct PushHandleInner<F> {
    pub(crate) high_tx: mpsc::Sender<F>,
    pub(crate) low_tx: mpsc::Sender<F>,
    pub(crate) limiter: Option<RateLimiter>,
}

/// Cloneable handle used to queue frames for one connection.
pub struct PushHandle<F>(Arc<PushHandleInner<F>>);

impl<F> Clone for PushHandle<F> {
    fn clone(&self) -> Self { Self(Arc::clone(&self.0)) }
}

impl<F> std::fmt::Debug for PushHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHandle")
            .field("closed", &self.0.low_tx.is_closed())
            .field("rate_limited", &self.0.limiter.is_some())
            .finish()
    }
}

impl<F: FrameLike> PushHandle<F> {
    pub(crate) fn new(inner: PushHandleInner<F>) -> Self { Self(Arc::new(inner)) }

    pub(crate) fn from_arc(inner: Arc<PushHandleInner<F>>) -> Self { Self(inner) }

    fn sender(&self, priority: PushPriority) -> &mpsc::Sender<F> {
        match priority {
            PushPriority::High => &self.0.high_tx,
            PushPriority::Low => &self.0.low_tx,
        }
    }

    /// Queue `frame`, waiting for capacity and for the rate limiter.
    ///
    /// Capacity is reserved before the limiter is consulted so a closed
    /// connection fails fast instead of waiting for a token.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] if the writer has gone away.
    pub async fn push(&self, frame: F, priority: PushPriority) -> Result<(), PushError> {
        let permit = self
            .sender(priority)
            .reserve()
            .await
            .map_err(|_| PushError::Closed)?;
        if let Some(limiter) = &self.0.limiter {
            limiter.acquire(1).await;
        }
        permit.send(frame);
        trace!(?priority, "frame queued");
        Ok(())
    }

    /// Queue a control frame ahead of regular traffic.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] if the writer has gone away.
    pub async fn push_high_priority(&self, frame: F) -> Result<(), PushError> {
        self.push(frame, PushPriority::High).await
    }

    /// Queue a regular frame.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Closed`] if the writer has gone away.
    pub async fn push_low_priority(&self, frame: F) -> Result<(), PushError> {
        self.push(frame, PushPriority::Low).await
    }

    /// Queue `frame` without waiting, applying `policy` if the queue is
    /// full. The rate limiter is not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::QueueFull`] under
    /// [`PushPolicy::ReturnErrorIfFull`] and [`PushError::Closed`] if the
    /// writer has gone away.
    pub fn try_push(
        &self,
        frame: F,
        priority: PushPriority,
        policy: PushPolicy,
    ) -> Result<(), PushError> {
        match self.sender(priority).try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PushError::Closed),
            Err(mpsc::error::TrySendError::Full(_)) => match policy {
                PushPolicy::ReturnErrorIfFull => Err(PushError::QueueFull),
                PushPolicy::DropIfFull => Ok(()),
                PushPolicy::WarnAndDropIfFull => {
                    warn!(?priority, "push queue full; frame dropped");
                    Ok(())
                }
            },
        }
    }

    /// Whether the writer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.0.low_tx.is_closed() }

    pub(crate) fn downgrade(&self) -> Weak<PushHandleInner<F>> { Arc::downgrade(&self.0) }
}
