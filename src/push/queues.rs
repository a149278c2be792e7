//! Receiving side of the push queues and its builder.

use std::time::Duration;

use leaky_bucket::RateLimiter;
use tokio::sync::mpsc;

use super::{PushConfigError, PushHandle, PushHandleInner};

/// Anything `Send + 'static` can be pushed.
pub trait FrameLike: Send + 'static {}

impl<T> FrameLike for T where T: Send + 'static {}

/// Highest supported rate for [`PushQueuesBuilder::rate`].
pub const MAX_PUSH_RATE: usize = 10_000;
/// Highest allowed capacity for either queue.
pub const MAX_QUEUE_CAPACITY: usize = 10_000;
/// Consecutive high priority frames delivered before a waiting low priority
/// frame gets a turn.
pub const HIGH_PRIORITY_BURST_LIMIT: usize = 8;

/// Priority level for outbound frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPriority {
    High,
    Low,
}

/// Behaviour of [`PushHandle::try_push`] when a queue is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPolicy {
    /// Return [`super::PushError::QueueFull`].
    ReturnErrorIfFull,
    /// Silently drop the frame.
    DropIfFull,
    /// Drop the frame and log a warning.
    WarnAndDropIfFull,
}

/// Receiver ends drained by a connection's writer task.
#[derive(Debug)]
pub struct PushQueues<F> {
    high_rx: mpsc::Receiver<F>,
    low_rx: mpsc::Receiver<F>,
    high_streak: usize,
}

impl<F: FrameLike> PushQueues<F> {
    /// Start configuring a new pair of queues.
    #[must_use]
    pub fn builder() -> PushQueuesBuilder<F> { PushQueuesBuilder::default() }

    /// Receive the next frame, preferring high priority.
    ///
    /// After [`HIGH_PRIORITY_BURST_LIMIT`] high priority frames in a row, a
    /// pending low priority frame is delivered first so bulk control traffic
    /// cannot starve results. Returns `None` when both queues are closed and
    /// empty.
    pub async fn recv(&mut self) -> Option<(PushPriority, F)> {
        if self.high_streak >= HIGH_PRIORITY_BURST_LIMIT {
            self.high_streak = 0;
            if let Ok(frame) = self.low_rx.try_recv() {
                return Some((PushPriority::Low, frame));
            }
        }
        let mut high_closed = false;
        let mut low_closed = false;
        loop {
            tokio::select! {
                biased;
                res = self.high_rx.recv(), if !high_closed => match res {
                    Some(frame) => {
                        self.high_streak += 1;
                        return Some((PushPriority::High, frame));
                    }
                    None => high_closed = true,
                },
                res = self.low_rx.recv(), if !low_closed => match res {
                    Some(frame) => {
                        self.high_streak = 0;
                        return Some((PushPriority::Low, frame));
                    }
                    None => low_closed = true,
                },
                else => return None,
            }
        }
    }

    /// Take a queued frame without waiting, high priority first.
    pub fn try_recv(&mut self) -> Option<(PushPriority, F)> {
        if let Ok(frame) = self.high_rx.try_recv() {
            return Some((PushPriority::High, frame));
        }
        self.low_rx
            .try_recv()
            .ok()
            .map(|frame| (PushPriority::Low, frame))
    }

    /// Refuse further pushes. Frames already queued can still be received.
    pub fn close(&mut self) {
        self.high_rx.close();
        self.low_rx.close();
    }
}

/// Builder for [`PushQueues`] and their [`PushHandle`].
///
/// Both queues default to a capacity of 64 with no rate limit.
///
/// ```
/// use hubframe::push::{PushPriority, PushQueues};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let (mut queues, handle) = PushQueues::<u8>::builder()
///     .high_capacity(4)
///     .low_capacity(4)
///     .build()
///     .expect("valid configuration");
/// handle.push(1, PushPriority::Low).await.expect("push");
/// handle.push(2, PushPriority::High).await.expect("push");
/// assert_eq!(queues.recv().await, Some((PushPriority::High, 2)));
/// assert_eq!(queues.recv().await, Some((PushPriority::Low, 1)));
/// # });
/// ```
#[derive(Debug)]
pub struct PushQueuesBuilder<F> {
    high_capacity: usize,
    low_capacity: usize,
    rate: Option<usize>,
    _frame: std::marker::PhantomData<fn() -> F>,
}

impl<F: FrameLike> Default for PushQueuesBuilder<F> {
    fn default() -> Self {
        Self {
            high_capacity: 64,
            low_capacity: 64,
            rate: None,
            _frame: std::marker::PhantomData,
        }
    }
}

impl<F: FrameLike> PushQueuesBuilder<F> {
    #[must_use]
    pub fn high_capacity(mut self, capacity: usize) -> Self {
        self.high_capacity = capacity;
        self
    }

    #[must_use]
    pub fn low_capacity(mut self, capacity: usize) -> Self {
        self.low_capacity = capacity;
        self
    }

    /// Cap pushes per second across both queues; `None` disables the limit.
    #[must_use]
    pub fn rate(mut self, rate: Option<usize>) -> Self {
        self.rate = rate;
        self
    }

    /// Build the queues and the producer handle.
    ///
    /// # Errors
    ///
    /// Returns [`PushConfigError::InvalidRate`] for a zero or excessive rate
    /// and [`PushConfigError::InvalidCapacity`] when either capacity is zero
    /// or above [`MAX_QUEUE_CAPACITY`].
    pub fn build(self) -> Result<(PushQueues<F>, PushHandle<F>), PushConfigError> {
        if let Some(rate) = self.rate
            && (rate == 0 || rate > MAX_PUSH_RATE)
        {
            return Err(PushConfigError::InvalidRate(rate));
        }
        let valid = |c: usize| (1..=MAX_QUEUE_CAPACITY).contains(&c);
        if !valid(self.high_capacity) || !valid(self.low_capacity) {
            return Err(PushConfigError::InvalidCapacity {
                high: self.high_capacity,
                low: self.low_capacity,
            });
        }
        let (high_tx, high_rx) = mpsc::channel(self.high_capacity);
        let (low_tx, low_rx) = mpsc::channel(self.low_capacity);
        let limiter = self.rate.map(|rate| {
            RateLimiter::builder()
                .initial(rate)
                .refill(rate)
                .interval(Duration::from_secs(1))
                .max(rate)
                .build()
        });
        let inner = PushHandleInner {
            high_tx,
            low_tx,
            limiter,
        };
        Ok((
            PushQueues {
                high_rx,
                low_rx,
                high_streak: 0,
            },
            PushHandle::new(inner),
        ))
    }
}
