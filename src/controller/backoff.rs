//! # Retry Backoff
//!
//! Rate limiting for failed reconciliations.
//!
//! Two limits combine, and the longer delay wins:
//! - a per-resource exponential backoff (`base * 2^failures`, capped), reset
//!   when the resource reconciles successfully
//! - a token bucket shared by every resource of every kind, bounding the
//!   aggregate retry rate against the backend
//!
//! ## Usage
//!
//! ```rust
//! use secret_access_controller::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(600));
//! assert_eq!(backoff.delay(0), Duration::from_secs(10));
//! assert_eq!(backoff.delay(1), Duration::from_secs(20));
//! assert_eq!(backoff.delay(10), Duration::from_secs(600)); // capped
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Exponential backoff calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after `failures` previous consecutive failures
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Token bucket refilled at `qps` tokens per second up to `burst`
#[derive(Debug, Clone)]
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(qps: u32, burst: u32) -> Self {
        Self::new_at(qps, burst, Instant::now())
    }

    #[must_use]
    pub fn new_at(qps: u32, burst: u32, now: Instant) -> Self {
        Self {
            qps: f64::from(qps.max(1)),
            burst: f64::from(burst.max(1)),
            tokens: f64::from(burst.max(1)),
            last: now,
        }
    }

    /// Take one token, returning how long the caller must wait for it
    pub fn reserve(&mut self) -> Duration {
        self.reserve_at(Instant::now())
    }

    pub fn reserve_at(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now.max(self.last);
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst) - 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.qps)
        }
    }
}

/// Shared handle to one bucket
pub type SharedBucket = Arc<Mutex<TokenBucket>>;

/// Per-resource backoff combined with a shared bucket
#[derive(Debug)]
pub struct RetryLimiter {
    backoff: ExponentialBackoff,
    failures: Mutex<HashMap<String, u32>>,
    bucket: SharedBucket,
}

impl RetryLimiter {
    #[must_use]
    pub fn new(backoff: ExponentialBackoff, bucket: SharedBucket) -> Self {
        Self {
            backoff,
            failures: Mutex::new(HashMap::new()),
            bucket,
        }
    }

    /// Record a failure of `key` and return the delay before its retry
    pub fn next_delay(&self, key: &str) -> Duration {
        let per_item = match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(key.to_string()).or_insert(0);
                let delay = self.backoff.delay(*count);
                *count = count.saturating_add(1);
                delay
            }
            Err(e) => {
                warn!("Failed to lock backoff state: {}, using base backoff", e);
                self.backoff.delay(0)
            }
        };

        let shared = match self.bucket.lock() {
            Ok(mut bucket) => bucket.reserve(),
            Err(e) => {
                warn!("Failed to lock retry bucket: {}", e);
                Duration::ZERO
            }
        };

        per_item.max(shared)
    }

    /// Forget the failure history of `key` after a success
    pub fn forget(&self, key: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }

    /// Consecutive failures recorded for `key`
    #[must_use]
    pub fn failures(&self, key: &str) -> u32 {
        self.failures
            .lock()
            .map(|failures| failures.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(600));
        let delays: Vec<u64> = (0..8).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 600, 600]);
    }

    #[test]
    fn test_exponential_does_not_overflow() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(60), Duration::from_secs(600));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_bucket_allows_burst_then_throttles() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 3, start);

        for _ in 0..3 {
            assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        }
        // Fourth token needs 1/10 s of refill
        let wait = bucket.reserve_at(start);
        assert!((wait.as_secs_f64() - 0.1).abs() < 1e-6, "{wait:?}");
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 1, start);
        assert_eq!(bucket.reserve_at(start), Duration::ZERO);
        assert_eq!(
            bucket.reserve_at(start + Duration::from_millis(100)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_limiter_tracks_keys_independently() {
        let bucket = Arc::new(Mutex::new(TokenBucket::new(10, 100)));
        let limiter = RetryLimiter::new(
            ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(600)),
            bucket,
        );

        assert_eq!(limiter.next_delay("ns/a"), Duration::from_secs(10));
        assert_eq!(limiter.next_delay("ns/a"), Duration::from_secs(20));
        assert_eq!(limiter.next_delay("ns/b"), Duration::from_secs(10));
        assert_eq!(limiter.failures("ns/a"), 2);

        limiter.forget("ns/a");
        assert_eq!(limiter.failures("ns/a"), 0);
        assert_eq!(limiter.next_delay("ns/a"), Duration::from_secs(10));
    }

    #[test]
    fn test_limiter_uses_shared_bucket_when_longer() {
        let bucket = Arc::new(Mutex::new(TokenBucket::new(1, 1)));
        let secrets = RetryLimiter::new(
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(1)),
            Arc::clone(&bucket),
        );
        let accesses = RetryLimiter::new(
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(1)),
            bucket,
        );

        assert_eq!(secrets.next_delay("ns/a"), Duration::from_millis(1));
        // The only token is gone, so the other kind waits on the bucket
        assert!(accesses.next_delay("ns/b") > Duration::from_millis(500));
    }
}
