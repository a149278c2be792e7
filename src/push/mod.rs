//! Prioritised outbound queues feeding a connection's writer task.
//!
//! Anything that needs to write to a connection (invocation tasks, stream
//! producers, the keep-alive timer, other connections broadcasting) goes
//! through a cloneable [`PushHandle`]. The writer drains the paired
//! [`PushQueues`], so bytes for one frame are never interleaved with another.
//! Control traffic (pings, close) uses the high priority queue; everything
//! else is low priority and keeps FIFO order per producer.

mod errors;
mod handle;
mod queues;

pub use errors::{PushConfigError, PushError};
pub use handle::PushHandle;
pub(crate) use handle::PushHandleInner;
pub use queues::{
    FrameLike,
    HIGH_PRIORITY_BURST_LIMIT,
    MAX_PUSH_RATE,
    MAX_QUEUE_CAPACITY,
    PushPolicy,
    PushPriority,
    PushQueues,
    PushQueuesBuilder,
};
