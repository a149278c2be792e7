//! Pause between failed `accept()` calls.

use std::time::Duration;

const MIN_DELAY: Duration = Duration::from_millis(1);

/// Doubling pause applied while the listener keeps failing.
///
/// The first failure waits `initial_delay`; each further consecutive
/// failure doubles the wait up to `max_delay`. One successful accept starts
/// the sequence over. Defaults are 10 ms and 1 s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Pause after `failures` consecutive failures, counting from one.
    ///
    /// Delays below a millisecond are raised to one, and a cap smaller than
    /// the initial delay is ignored.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use hubframe::server::BackoffConfig;
    ///
    /// let backoff = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::from_millis(12),
    /// };
    /// let waits: Vec<_> = (1..=4).map(|n| backoff.delay_for(n).as_millis()).collect();
    /// assert_eq!(waits, [5, 10, 12, 12]);
    /// ```
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let first = self.initial_delay.max(MIN_DELAY);
        let cap = self.max_delay.max(first);
        let factor = 1_u32
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(u32::MAX);
        first.saturating_mul(factor).min(cap)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::BackoffConfig;

    #[rstest]
    #[case::zeroes(Duration::ZERO, Duration::ZERO, [1, 1, 1])]
    #[case::inverted(Duration::from_millis(8), Duration::from_millis(2), [8, 8, 8])]
    #[case::doubling(Duration::from_millis(3), Duration::from_secs(1), [3, 6, 12])]
    fn delays_stay_within_bounds(
        #[case] initial_delay: Duration,
        #[case] max_delay: Duration,
        #[case] expected: [u64; 3],
    ) {
        let backoff = BackoffConfig {
            initial_delay,
            max_delay,
        };
        assert_eq!([1, 2, 3].map(|n| backoff.delay_for(n)), expected.map(Duration::from_millis));
    }

    #[test]
    fn long_failure_runs_saturate_at_the_cap() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(u32::MAX), backoff.max_delay);
    }
}
