//! Per-connection dispatcher settings.

use std::time::Duration;

use crate::{
    codec::DEFAULT_MAX_MESSAGE_SIZE,
    push::{MAX_PUSH_RATE, MAX_QUEUE_CAPACITY},
};

/// Settings applied to every connection a hub serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubOptions {
    /// Idle period after which the server sends a `Ping`.
    pub keep_alive_interval: Duration,
    /// Silence from the client after which the connection is closed.
    pub client_timeout_interval: Duration,
    /// Time allowed for the handshake to complete.
    pub handshake_timeout: Duration,
    /// Largest inbound or outbound hub message.
    pub maximum_message_size: usize,
    /// Send handler error text to callers.
    pub enable_detailed_errors: bool,
    /// Non-stream invocations allowed to run at once per connection.
    pub maximum_parallel_invocations: usize,
    /// Capacity of the control (ping, close) queue.
    pub high_priority_capacity: usize,
    /// Capacity of the regular outbound queue.
    pub low_priority_capacity: usize,
    /// Optional cap on outbound messages per second.
    pub push_rate: Option<usize>,
    /// Time allowed for output to flush after a stop.
    pub close_timeout: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(15),
            client_timeout_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            maximum_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            enable_detailed_errors: false,
            maximum_parallel_invocations: 16,
            high_priority_capacity: 16,
            low_priority_capacity: 64,
            push_rate: None,
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl HubOptions {
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn client_timeout_interval(mut self, timeout: Duration) -> Self {
        self.client_timeout_interval = timeout;
        self
    }

    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn maximum_message_size(mut self, size: usize) -> Self {
        self.maximum_message_size = size.max(1);
        self
    }

    #[must_use]
    pub fn enable_detailed_errors(mut self, enabled: bool) -> Self {
        self.enable_detailed_errors = enabled;
        self
    }

    #[must_use]
    pub fn maximum_parallel_invocations(mut self, limit: usize) -> Self {
        self.maximum_parallel_invocations = limit.max(1);
        self
    }

    /// Queue capacities, clamped to `1..=MAX_QUEUE_CAPACITY`.
    #[must_use]
    pub fn queue_capacities(mut self, high: usize, low: usize) -> Self {
        self.high_priority_capacity = high.clamp(1, MAX_QUEUE_CAPACITY);
        self.low_priority_capacity = low.clamp(1, MAX_QUEUE_CAPACITY);
        self
    }

    /// Outbound rate cap, clamped to `1..=MAX_PUSH_RATE`.
    #[must_use]
    pub fn push_rate(mut self, rate: Option<usize>) -> Self {
        self.push_rate = rate.map(|r| r.clamp(1, MAX_PUSH_RATE));
        self
    }

    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}
