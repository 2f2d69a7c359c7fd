//! Exponential backoff with full jitter for retriable adapter errors.

use std::time::Duration;

use rand::Rng;

/// Backoff policy. `max_attempts` counts the first try, so `max_attempts =
/// 3` means up to two retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base: Duration::from_millis(100), cap: Duration::from_secs(10) }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn should_retry(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Full-jitter exponential backoff: `random(0, min(cap, base * 2^attempt))`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.cap.as_millis());
        if capped == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(0..=capped);
        Duration::from_millis(jittered as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_retrying_at_max_attempts() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let policy = RetryPolicy { max_attempts: 10, base: Duration::from_millis(100), cap: Duration::from_millis(500) };
        for attempt in 0..10 {
            assert!(policy.backoff(attempt) <= Duration::from_millis(500));
        }
    }
}
