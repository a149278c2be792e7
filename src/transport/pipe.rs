//! Bounded duplex channels of whole frames.
//!
//! A [`DuplexPipe`] joins a transport to the application. Each side owns one
//! [`PipeEnd`]; whatever one end sends the other receives. Every item is a
//! complete frame, so output from concurrent producers can interleave only
//! at frame boundaries.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::TransportError;

/// Sending half of a pipe end.
#[derive(Clone, Debug)]
pub struct PipeSender(mpsc::Sender<Bytes>);

impl PipeSender {
    /// Send one frame, waiting while the pipe is full.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the other end is gone.
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.0.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Whether the receiving end has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.0.is_closed() }
}

/// Receiving half of a pipe end.
#[derive(Debug)]
pub struct PipeReceiver(mpsc::Receiver<Bytes>);

impl PipeReceiver {
    /// Next frame, or `None` once every sender on the other end is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> { self.0.recv().await }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Bytes> { self.0.try_recv().ok() }
}

/// One side of a [`DuplexPipe`].
#[derive(Debug)]
pub struct PipeEnd {
    pub tx: PipeSender,
    pub rx: PipeReceiver,
}

impl PipeEnd {
    /// Send one frame to the other side.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the other side has dropped its
    /// receiver.
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx.send(frame).await
    }

    /// Receive the next frame from the other side.
    pub async fn recv(&mut self) -> Option<Bytes> { self.rx.recv().await }

    /// Separate the halves so reading and writing can move to different
    /// tasks.
    #[must_use]
    pub fn split(self) -> (PipeSender, PipeReceiver) { (self.tx, self.rx) }
}

/// A connected pair of pipe ends.
#[derive(Debug)]
pub struct DuplexPipe {
    /// End driven by the transport.
    pub transport: PipeEnd,
    /// End driven by the application.
    pub application: PipeEnd,
}

impl DuplexPipe {
    /// Create a pipe buffering up to `capacity` frames in each direction.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (to_app, from_transport) = mpsc::channel(capacity);
        let (to_transport, from_app) = mpsc::channel(capacity);
        Self {
            transport: PipeEnd {
                tx: PipeSender(to_app),
                rx: PipeReceiver(from_app),
            },
            application: PipeEnd {
                tx: PipeSender(to_transport),
                rx: PipeReceiver(from_transport),
            },
        }
    }

    /// Split into `(transport, application)` ends.
    #[must_use]
    pub fn into_ends(self) -> (PipeEnd, PipeEnd) { (self.transport, self.application) }
}
