//! Errors for push queue operations and configuration.

use thiserror::Error;

use super::{MAX_PUSH_RATE, MAX_QUEUE_CAPACITY};

/// Failure to hand a frame to a connection.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The queue was full and the policy was
    /// [`super::PushPolicy::ReturnErrorIfFull`].
    #[error("push queue full")]
    QueueFull,
    /// The connection's writer has gone away.
    #[error("push queue closed")]
    Closed,
}

/// Invalid [`super::PushQueuesBuilder`] settings.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushConfigError {
    #[error("invalid rate {0}; must be between 1 and {max}", max = MAX_PUSH_RATE)]
    InvalidRate(usize),
    #[error(
        "invalid capacities; high={high}, low={low}; each must be between 1 and {max}",
        max = MAX_QUEUE_CAPACITY
    )]
    InvalidCapacity { high: usize, low: usize },
}
