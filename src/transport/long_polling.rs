//! Long polling transport.
//!
//! Outbound frames accumulate in a bounded buffer until the client's next
//! GET; each poll drains everything buffered so far as one batch. Frames
//! produced between polls are kept, never dropped: a client that stops
//! polling long enough to overflow the buffer loses the connection instead.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::{PipeEnd, PostHandle, TransferFormat, Transport, TransportError, TransportKind};

/// Settings for [`LongPollingTransport`].
#[derive(Clone, Copy, Debug)]
pub struct LongPollingOptions {
    /// How long a poll waits for data before answering empty.
    pub poll_timeout: Duration,
    /// Frames that may wait between two polls before the connection fails.
    pub max_buffered_messages: usize,
    /// Request bodies that may queue before `post` waits.
    pub post_capacity: usize,
}

impl Default for LongPollingOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(90),
            max_buffered_messages: 1024,
            post_capacity: 16,
        }
    }
}

impl LongPollingOptions {
    #[must_use]
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_buffered_messages(mut self, max: usize) -> Self {
        self.max_buffered_messages = max.max(1);
        self
    }
}

/// Answer to a single poll request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollResult {
    /// Every frame buffered since the previous poll, concatenated.
    Data(Bytes),
    /// Nothing arrived within the poll timeout; the client should poll again.
    Timeout,
    /// The connection is over; the client must not poll again.
    Closed,
}

#[derive(Debug)]
struct Buffer {
    frames: Mutex<VecDeque<Bytes>>,
    ready: Notify,
    closed: AtomicBool,
}

impl Buffer {
    fn frames(&self) -> std::sync::MutexGuard<'_, VecDeque<Bytes>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `frame`, returning the new depth or `None` if `max` was hit.
    fn push(&self, frame: Bytes, max: usize) -> Option<usize> {
        let mut frames = self.frames();
        if frames.len() >= max {
            return None;
        }
        frames.push_back(frame);
        let depth = frames.len();
        drop(frames);
        self.ready.notify_waiters();
        Some(depth)
    }

    fn take_batch(&self) -> Option<Bytes> {
        let mut frames = self.frames();
        if frames.is_empty() {
            return None;
        }
        let mut batch = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
        for frame in frames.drain(..) {
            batch.extend_from_slice(&frame);
        }
        Some(batch.freeze())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }
}

/// Long polling transport; the HTTP layer serves requests through the
/// paired [`LongPollingHandle`].
pub struct LongPollingTransport {
    buffer: Arc<Buffer>,
    posts: mpsc::Receiver<Bytes>,
    max_buffered: usize,
}

/// Entry points for the HTTP layer's GET and POST handlers.
#[derive(Clone, Debug)]
pub struct LongPollingHandle {
    buffer: Arc<Buffer>,
    post: PostHandle,
    poll_timeout: Duration,
}

impl LongPollingTransport {
    #[must_use]
    pub fn new(options: LongPollingOptions) -> (Self, LongPollingHandle) {
        let buffer = Arc::new(Buffer {
            frames: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let (post, posts) = PostHandle::channel(options.post_capacity);
        let transport = Self {
            buffer: Arc::clone(&buffer),
            posts,
            max_buffered: options.max_buffered_messages.max(1),
        };
        let handle = LongPollingHandle {
            buffer,
            post,
            poll_timeout: options.poll_timeout,
        };
        (transport, handle)
    }
}

impl LongPollingHandle {
    /// Serve one poll: return buffered frames at once, otherwise wait up to
    /// the poll timeout for some to arrive.
    pub async fn poll(&self) -> PollResult {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            let notified = self.buffer.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(batch) = self.buffer.take_batch() {
                return PollResult::Data(batch);
            }
            if self.buffer.is_closed() {
                return PollResult::Closed;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return PollResult::Timeout;
            }
        }
    }

    /// Deliver one POSTed request body.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the transport has finished.
    pub async fn post(&self, body: Bytes) -> Result<(), TransportError> {
        if self.buffer.is_closed() {
            return Err(TransportError::Closed);
        }
        self.post.post(body).await
    }

    /// Whether the connection behind this handle has finished.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.buffer.is_closed() }
}

#[async_trait]
impl Transport for LongPollingTransport {
    fn kind(&self) -> TransportKind { TransportKind::LongPolling }

    async fn start(&mut self, _format: TransferFormat) -> Result<(), TransportError> { Ok(()) }

    async fn process(
        &mut self,
        pipe: PipeEnd,
        stop: CancellationToken,
    ) -> Result<(), TransportError> {
        let (tx, mut rx) = pipe.split();
        let mut input = Some(tx);
        let result = loop {
            tokio::select! {
                biased;

                () = stop.cancelled(), if input.is_some() => {
                    input = None;
                    self.posts.close();
                }

                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if self.buffer.push(frame, self.max_buffered).is_none() {
                            tracing::warn!(
                                max = self.max_buffered,
                                "long polling buffer full; client stopped polling"
                            );
                            break Err(TransportError::BufferOverflow {
                                max: self.max_buffered,
                            });
                        }
                    }
                    None => break Ok(()),
                },

                body = self.posts.recv(), if input.is_some() => match body {
                    Some(body) => {
                        if let Some(tx) = &input
                            && tx.send(body).await.is_err()
                        {
                            break Ok(());
                        }
                    }
                    None => input = None,
                },
            }
        };
        self.buffer.close();
        result
    }
}
