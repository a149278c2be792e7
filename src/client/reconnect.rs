//! Reconnection policy and the retry state machine.
//!
//! [`ReconnectState`] is a pure state machine: it decides whether another
//! attempt is allowed and tracks the retry counter. The delay between
//! attempts comes from a [`RetryPolicy`].

use std::{fmt, time::Duration};

/// Delays between reconnect attempts.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Attempts allowed after a connection is lost.
    fn max_attempts(&self) -> u32;

    /// Delay before attempt number `retry_count` (starting at zero).
    fn delay(&self, retry_count: u32) -> Duration;
}

/// Immediate first retry, then doubling delays up to a cap.
///
/// ```
/// use std::time::Duration;
///
/// use hubframe::client::{ExponentialBackoff, RetryPolicy};
///
/// let policy = ExponentialBackoff::default();
/// assert_eq!(policy.delay(0), Duration::ZERO);
/// assert_eq!(policy.delay(1), Duration::from_millis(500));
/// assert_eq!(policy.delay(3), Duration::from_secs(2));
/// assert_eq!(policy.delay(20), Duration::from_secs(30));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 { self.max_attempts }

    fn delay(&self, retry_count: u32) -> Duration {
        let Some(exponent) = retry_count.checked_sub(1) else {
            return Duration::ZERO;
        };
        let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// One explicit delay per attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedDelays(pub Vec<Duration>);

impl RetryPolicy for FixedDelays {
    fn max_attempts(&self) -> u32 { u32::try_from(self.0.len()).unwrap_or(u32::MAX) }

    fn delay(&self, retry_count: u32) -> Duration {
        usize::try_from(retry_count)
            .ok()
            .and_then(|i| self.0.get(i))
            .or(self.0.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Phase of the reconnect machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectPhase {
    Disconnected,
    Reconnecting,
    Connected,
    /// Retries are exhausted; only an explicit restart leaves this phase.
    Failed,
}

/// Reconnect state machine with a bounded retry counter.
///
/// The counter resets only on a successful (re)connect and never exceeds
/// the maximum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectState {
    phase: ReconnectPhase,
    retry_count: u32,
    max_retries: u32,
}

impl ReconnectState {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            phase: ReconnectPhase::Disconnected,
            retry_count: 0,
            max_retries,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ReconnectPhase { self.phase }

    #[must_use]
    pub fn retry_count(&self) -> u32 { self.retry_count }

    /// A connection was established.
    pub fn connected(&mut self) {
        self.phase = ReconnectPhase::Connected;
        self.retry_count = 0;
    }

    /// An established connection was lost unexpectedly.
    pub fn connection_lost(&mut self) {
        if self.phase == ReconnectPhase::Connected {
            self.phase = ReconnectPhase::Reconnecting;
        }
    }

    /// Claim the next attempt, returning its retry number.
    ///
    /// Returns `None` and moves to [`ReconnectPhase::Failed`] once the budget
    /// is spent, or `None` without a transition outside
    /// [`ReconnectPhase::Reconnecting`].
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.phase != ReconnectPhase::Reconnecting {
            return None;
        }
        if self.retry_count >= self.max_retries {
            self.phase = ReconnectPhase::Failed;
            return None;
        }
        let attempt = self.retry_count;
        self.retry_count += 1;
        Some(attempt)
    }

    /// The connection was stopped on purpose.
    pub fn stopped(&mut self) { self.phase = ReconnectPhase::Disconnected; }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[test]
    fn exhausting_retries_fails() {
        let mut state = ReconnectState::new(2);
        state.connected();
        state.connection_lost();
        assert_eq!(state.phase(), ReconnectPhase::Reconnecting);
        assert_eq!(state.next_attempt(), Some(0));
        assert_eq!(state.next_attempt(), Some(1));
        assert_eq!(state.next_attempt(), None);
        assert_eq!(state.phase(), ReconnectPhase::Failed);
        assert_eq!(state.retry_count(), 2);
        assert_eq!(state.next_attempt(), None);
    }

    #[test]
    fn success_resets_the_counter() {
        let mut state = ReconnectState::new(3);
        state.connected();
        state.connection_lost();
        state.next_attempt();
        state.next_attempt();
        assert_eq!(state.retry_count(), 2);
        state.connected();
        assert_eq!(state.retry_count(), 0);
        state.connection_lost();
        assert_eq!(state.next_attempt(), Some(0));
    }

    #[test]
    fn no_attempts_outside_reconnecting() {
        let mut state = ReconnectState::new(3);
        assert_eq!(state.next_attempt(), None);
        state.connection_lost();
        assert_eq!(state.phase(), ReconnectPhase::Disconnected);
        state.connected();
        state.stopped();
        state.connection_lost();
        assert_eq!(state.phase(), ReconnectPhase::Disconnected);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 500)]
    #[case(2, 1_000)]
    #[case(4, 4_000)]
    #[case(7, 30_000)]
    #[case(u32::MAX, 30_000)]
    fn exponential_delays(#[case] retry: u32, #[case] millis: u64) {
        assert_eq!(
            ExponentialBackoff::default().delay(retry),
            Duration::from_millis(millis)
        );
    }

    #[test]
    fn fixed_delays_repeat_the_last_entry() {
        let policy = FixedDelays(vec![Duration::from_millis(1), Duration::from_millis(2)]);
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay(0), Duration::from_millis(1));
        assert_eq!(policy.delay(9), Duration::from_millis(2));
        assert_eq!(FixedDelays(Vec::new()).delay(0), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn counter_never_exceeds_the_budget(max in 0_u32..8, steps in proptest::collection::vec(0_u8..3, 0..40)) {
            let mut state = ReconnectState::new(max);
            state.connected();
            for step in steps {
                match step {
                    0 => state.connection_lost(),
                    1 => { state.next_attempt(); }
                    _ => state.connected(),
                }
                prop_assert!(state.retry_count() <= max);
            }
        }
    }
}
