//! Bounded exponential backoff for retryable gateway errors.

use std::time::Duration;

/// Doubling backoff with a cap: `base * 2^n`, never exceeding `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempts: 0,
        }
    }

    /// Get the delay for the next retry and advance the counter.
    pub fn next_delay(&mut self) -> Duration {
        // 2^16 * any practical base already exceeds any practical cap
        let exp = self.attempts.min(16);
        self.attempts += 1;
        self.base.saturating_mul(1u32 << exp).min(self.cap)
    }

    /// Reset after a successful call or a fresh sojourn.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_until_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_delays_are_monotonically_non_decreasing() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(30));
        let mut last = Duration::ZERO;
        for _ in 0..40 {
            let delay = backoff.next_delay();
            assert!(delay >= last);
            assert!(delay <= Duration::from_secs(30));
            last = delay;
        }
    }

    #[test]
    fn test_reset_restarts_the_sequence() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
