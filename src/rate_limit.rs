//! Per-source token-bucket rate limiting for adapter calls.
//!
//! Grounded in the streaming layer's per-tenant token bucket: a bucket has
//! a burst capacity and a steady refill rate, and callers wait
//! cooperatively rather than being rejected outright, since an
//! over-saturated source should simply slow the ready-set down rather than
//! fail operations that would otherwise succeed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::sleep;

/// Configuration for one source's bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Maximum concurrent/instantaneous permits the bucket can hold.
    pub burst_capacity: u32,
    /// Tokens replenished per second.
    pub refill_per_sec: f64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self { burst_capacity: 4, refill_per_sec: 4.0 }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    limit: RateLimit,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.limit.refill_per_sec).min(self.limit.burst_capacity as f64);
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn wait_estimate(&self) -> Duration {
        if self.limit.refill_per_sec <= 0.0 {
            return Duration::from_millis(50);
        }
        let deficit = (1.0 - self.tokens).max(0.0);
        Duration::from_secs_f64(deficit / self.limit.refill_per_sec)
    }
}

/// A token bucket per source, shared by every worker in the executor.
#[derive(Clone)]
pub struct SourceRateLimiter {
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
    default_limit: RateLimit,
}

impl SourceRateLimiter {
    #[must_use]
    pub fn new(default_limit: RateLimit) -> Self {
        Self { buckets: Arc::new(Mutex::new(HashMap::new())), default_limit }
    }

    pub fn configure(&self, source_id: impl Into<String>, limit: RateLimit) {
        let mut buckets = self.buckets.lock();
        buckets.insert(
            source_id.into(),
            BucketState { tokens: limit.burst_capacity as f64, last_refill: Instant::now(), limit },
        );
    }

    /// Wait until a token is available for `source_id`, then consume it.
    pub async fn acquire(&self, source_id: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets.entry(source_id.to_string()).or_insert_with(|| BucketState {
                    tokens: self.default_limit.burst_capacity as f64,
                    last_refill: Instant::now(),
                    limit: self.default_limit,
                });
                if bucket.try_take() {
                    None
                } else {
                    Some(bucket.wait_estimate())
                }
            };
            match wait {
                None => return,
                Some(duration) => sleep(duration.max(Duration::from_millis(1))).await,
            }
        }
    }
}
