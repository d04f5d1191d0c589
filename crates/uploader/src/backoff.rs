//! Retry delays: exponential growth, random jitter, hard cap.

use std::time::Duration;

use rand::Rng;

/// Smallest delay ever returned.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Computes how long to wait before retrying.
///
/// `delay(attempt) = min(base * 2^attempt + jitter, cap)` with `jitter`
/// drawn uniformly from `[0, jitter_max)`. Stateless: the caller owns the
/// attempt counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit multiplied by `2^attempt`.
    pub base: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Exclusive upper bound of the random jitter.
    pub jitter_max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2000),
            cap: Duration::from_millis(5000),
            jitter_max: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    /// Delay for `attempt` with fresh random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_max.is_zero() {
            Duration::ZERO
        } else {
            let nanos = self.jitter_max.as_nanos().min(u64::MAX as u128) as u64;
            Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay for `attempt` with an explicit jitter value.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 1u32 << attempt.min(31);
        self.base
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.cap)
            .max(MIN_DELAY)
    }
}
