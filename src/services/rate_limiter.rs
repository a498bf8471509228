//! Token bucket rate limiting for outbound source calls.
//!
//! Each source gets one bucket, created lazily by [`RateLimiterRegistry`].
//! `acquire` never rejects a caller, it only delays it until a token refills.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How long a starved caller sleeps before re-checking the bucket
const REFILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    period: Duration,
    state: tokio::sync::Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            period,
            state: tokio::sync::Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn per_minute(calls_per_minute: u32) -> Self {
        Self::new(calls_per_minute, Duration::from_secs(60))
    }

    /// Wait until a token is available and take it.
    ///
    /// The bucket lock is held for the whole wait, so concurrent callers on
    /// the same source queue up behind each other instead of racing refills.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        while state.tokens < 1.0 {
            tokio::time::sleep(REFILL_POLL_INTERVAL).await;
            self.refill(&mut state);
        }

        state.tokens -= 1.0;
    }

    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let rate = self.capacity / self.period.as_secs_f64().max(f64::EPSILON);

        state.tokens = (state.tokens + elapsed * rate).min(self.capacity);
        state.last_refill = now;
    }
}

/// Buckets keyed by source name
#[derive(Default)]
pub struct RateLimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the bucket for `source`, creating it on first use.
    ///
    /// The rate only applies when the bucket is created.
    pub fn get_limiter(&self, source: &str, calls_per_minute: u32) -> Arc<TokenBucket> {
        self.limiters
            .lock()
            .entry(source.to_string())
            .or_insert_with(|| {
                tracing::debug!(source = %source, calls_per_minute, "Creating rate limiter");
                Arc::new(TokenBucket::per_minute(calls_per_minute))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_immediate_calls_consume_tokens() {
        let limiter = TokenBucket::per_minute(60);

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(limiter.available_tokens().await < 60.0);
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        let limiter = TokenBucket::new(10, Duration::from_secs(1));

        for _ in 0..10 {
            limiter.acquire().await;
        }
        let drained = limiter.available_tokens().await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(limiter.available_tokens().await > drained);
    }

    #[tokio::test]
    async fn test_third_acquire_waits_when_capacity_is_two() {
        let limiter = TokenBucket::new(2, Duration::from_secs(1));

        limiter.acquire().await;
        limiter.acquire().await;

        let start = StdInstant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        // One token refills every 500ms at this rate
        assert!(waited >= Duration::from_millis(300), "waited only {:?}", waited);
    }

    #[tokio::test]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = TokenBucket::new(3, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(limiter.available_tokens().await <= 3.0);
    }

    #[test]
    fn test_registry_reuses_bucket_per_source() {
        let registry = RateLimiterRegistry::new();

        let first = registry.get_limiter("coingecko", 30);
        let again = registry.get_limiter("coingecko", 999);
        let other = registry.get_limiter("rss_feed", 20);

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn test_zero_capacity_still_makes_progress() {
        let limiter = TokenBucket::new(0, Duration::from_secs(1));
        limiter.acquire().await;
    }
}
