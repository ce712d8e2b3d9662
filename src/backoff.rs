//! # Fibonacci Backoff
//!
//! Retry delay policy for the work queue rate limiter.
//!
//! Delays grow along the Fibonacci sequence, which climbs more gently than
//! exponential backoff while still spacing out repeated failures. The
//! sequence is scaled by a base duration and capped at a maximum wait.
//!
//! With the default 5ms base: 5ms, 5ms, 10ms, 15ms, 25ms, 40ms, ... up to
//! the 30s cap.

use std::time::Duration;

use crate::constants::{BACKOFF_BASE_MS, BACKOFF_MAX_MS};

/// Maps a retry count to a bounded Fibonacci delay.
///
/// Stateless by design: the work queue tracks per-key retry counts and asks
/// for the delay matching the current count, so one policy value serves
/// every key.
#[derive(Debug, Clone, Copy)]
pub struct FibonacciBackoff {
    base: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a backoff policy with the given base step and maximum wait.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the next retry, given the number of failures so far.
    ///
    /// `attempt` 0 yields the base delay; each further attempt advances one
    /// step along the Fibonacci sequence. The result never exceeds the
    /// configured maximum and never decreases as `attempt` grows.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis();
        let max_ms = self.max.as_millis();

        let mut prev: u128 = 0;
        let mut current: u128 = 1;
        for _ in 0..attempt {
            let next = prev.saturating_add(current);
            prev = current;
            current = next;
            // Once past the cap, further steps cannot change the result.
            if base_ms.saturating_mul(current) >= max_ms {
                return self.max;
            }
        }

        let millis = base_ms.saturating_mul(current).min(max_ms);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(BACKOFF_BASE_MS),
            Duration::from_millis(BACKOFF_MAX_MS),
        )
    }
}
