//! Token-bucket rate limiter for outbound call attempts.
//!
//! Each guarded service owns one bucket. The bucket's lock is independent
//! of the circuit breaker's so load shedding never serializes against
//! breaker state updates.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use breakwater_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Token bucket configuration for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Bucket capacity; also the initial token count.
    pub max_tokens: u32,
    /// Interval at which one token is replenished.
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_tokens: 100, refill_interval: Duration::from_millis(10) }
    }
}

/// Token bucket guarding one service's outbound call rate.
///
/// `allow` refills `floor(elapsed / refill_interval)` tokens capped at
/// `max_tokens`, then consumes one if available. A `false` result is a
/// load-shedding decision, made before the circuit breaker or the wrapped
/// call are ever consulted.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let state = BucketState { tokens: config.max_tokens, last_refill: clock.now() };
        Self { config, clock, state: Mutex::new(state) }
    }

    /// Attempts to take one token, refilling for elapsed time first.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.lock().await;

        let now = self.clock.now();
        let elapsed = now.duration_since(state.last_refill);

        let tokens_to_add = if self.config.refill_interval.is_zero() {
            u128::from(self.config.max_tokens)
        } else {
            elapsed.as_nanos() / self.config.refill_interval.as_nanos()
        };

        if tokens_to_add > 0 {
            let added = u32::try_from(tokens_to_add).unwrap_or(u32::MAX);
            state.tokens = state.tokens.saturating_add(added).min(self.config.max_tokens);
            state.last_refill = now;
        }

        if state.tokens > 0 {
            state.tokens -= 1;
            return true;
        }

        false
    }

    /// Returns the current token count without refilling.
    pub async fn available(&self) -> u32 {
        self.state.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use breakwater_core::TestClock;

    use super::*;

    fn bucket(max_tokens: u32, refill_ms: u64) -> (TokenBucket, TestClock) {
        let clock = TestClock::new();
        let config = RateLimiterConfig {
            max_tokens,
            refill_interval: Duration::from_millis(refill_ms),
        };
        (TokenBucket::new(config, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn bucket_starts_full() {
        let (bucket, _clock) = bucket(3, 100);

        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(!bucket.allow().await);
    }

    #[tokio::test]
    async fn empty_bucket_refills_over_time() {
        let (bucket, clock) = bucket(2, 100);

        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(!bucket.allow().await);

        // One full interval buys exactly one token.
        clock.advance(Duration::from_millis(100));
        assert!(bucket.allow().await);
        assert!(!bucket.allow().await);
    }

    #[tokio::test]
    async fn partial_interval_adds_nothing() {
        let (bucket, clock) = bucket(1, 100);

        assert!(bucket.allow().await);
        clock.advance(Duration::from_millis(99));
        assert!(!bucket.allow().await);
    }

    #[tokio::test]
    async fn refill_is_capped_at_max_tokens() {
        let (bucket, clock) = bucket(3, 10);

        assert!(bucket.allow().await);
        clock.advance(Duration::from_secs(60));

        // A long idle period refills to capacity, never beyond.
        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(!bucket.allow().await);
    }

    #[tokio::test]
    async fn multiple_intervals_refill_proportionally() {
        let (bucket, clock) = bucket(10, 100);

        for _ in 0..10 {
            assert!(bucket.allow().await);
        }
        assert!(!bucket.allow().await);

        clock.advance(Duration::from_millis(350));
        assert_eq!(bucket.available().await, 0);

        // floor(350ms / 100ms) = 3 tokens.
        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(bucket.allow().await);
        assert!(!bucket.allow().await);
    }
}
