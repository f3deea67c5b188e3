//! Rate limiting and throttling.
//!
//! Per-principal token buckets with lazy refill. Each call adds the tokens
//! earned since the bucket was last touched (capped at capacity), then tries
//! to take one.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::{Error, Result};

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until at least one token is available again.
    pub reset_seconds: u64,
}

impl RateLimitDecision {
    /// `Ok(self)` when allowed, `Error::RateLimited` otherwise.
    pub fn into_result(self) -> Result<Self> {
        if self.allowed {
            Ok(self)
        } else {
            Err(Error::RateLimited {
                retry_after_seconds: self.reset_seconds,
            })
        }
    }
}

/// Token bucket refilled at `limit_per_minute / 60` tokens per second.
#[derive(Debug)]
struct TokenBucket {
    limit_per_minute: u32,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit_per_minute: u32, now: Instant) -> Self {
        Self {
            limit_per_minute,
            tokens: f64::from(limit_per_minute),
            last_refill: now,
        }
    }

    fn capacity(&self) -> f64 {
        f64::from(self.limit_per_minute)
    }

    /// Refill, then take one token if available.
    fn try_take(&mut self, now: Instant) -> RateLimitDecision {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if now > self.last_refill {
            self.last_refill = now;
        }
        self.tokens = (self.tokens + elapsed * self.capacity() / 60.0).min(self.capacity());

        let allowed = self.tokens >= 1.0;
        if allowed {
            self.tokens -= 1.0;
        }

        let reset_seconds = if self.tokens >= 1.0 {
            0
        } else {
            // (1 - tokens) / (limit / 60), kept in this form to stay exact for whole tokens
            ((1.0 - self.tokens) * 60.0 / self.capacity()).ceil().max(1.0) as u64
        };

        RateLimitDecision {
            allowed,
            limit: self.limit_per_minute,
            remaining: self.tokens.floor() as u32,
            reset_seconds,
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_refill)
    }
}

/// Rate limiter - one token bucket per principal.
///
/// The bucket map and each bucket have separate locks: the map lock only
/// guards bucket creation, the bucket lock guards refill-and-take.
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: u32,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl RateLimiter {
    pub fn new(default_limit_per_minute: u32) -> Self {
        Self {
            default_limit: default_limit_per_minute.max(1),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Check the principal's bucket, creating it on first use.
    pub fn check(&self, principal: &str, limit_per_minute: Option<u32>) -> RateLimitDecision {
        self.check_at(principal, limit_per_minute, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(
        &self,
        principal: &str,
        limit_per_minute: Option<u32>,
        now: Instant,
    ) -> RateLimitDecision {
        let limit = limit_per_minute.unwrap_or(self.default_limit).max(1);
        let bucket = self.bucket(principal, limit, now);
        let decision = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_take(now);

        if !decision.allowed {
            tracing::debug!(
                principal,
                retry_after = decision.reset_seconds,
                "rate_limited"
            );
        }
        decision
    }

    fn bucket(&self, principal: &str, limit: u32, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(principal)
        {
            return bucket.clone();
        }

        // Re-checked under the write lock so racing first calls share one bucket.
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(principal.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(limit, now))))
            .clone()
    }

    /// Drop buckets untouched for at least `max_idle`. Returns how many were removed.
    ///
    /// An idle bucket has refilled to capacity, so recreating it later is
    /// indistinguishable from keeping it.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            let idle = bucket.idle_for(now);
            idle < max_idle
                || bucket.tokens + idle.as_secs_f64() * bucket.capacity() / 60.0
                    < bucket.capacity()
        });
        before - buckets.len()
    }

    /// Forget a principal's bucket.
    pub fn reset(&self, principal: &str) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(principal);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_capacity_then_denied() {
        let limiter = RateLimiter::new(60);
        let now = Instant::now();
        for i in 0..5 {
            let d = limiter.check_at("alice", Some(5), now);
            assert!(d.allowed, "call {i} should pass");
            assert_eq!(d.remaining, 4 - i);
        }

        let denied = limiter.check_at("alice", Some(5), now);
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 5);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_seconds, 12);
        assert!(matches!(
            denied.into_result(),
            Err(Error::RateLimited { retry_after_seconds: 12 })
        ));
    }

    #[test]
    fn test_refill_after_one_token_interval() {
        let limiter = RateLimiter::new(60);
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("bob", Some(5), start).allowed);
        }
        assert!(!limiter.check_at("bob", Some(5), start).allowed);

        let later = start + Duration::from_secs(12);
        assert!(limiter.check_at("bob", Some(5), later).allowed);
        assert!(!limiter.check_at("bob", Some(5), later).allowed);
    }

    #[test]
    fn test_refill_capped_at_capacity() {
        let limiter = RateLimiter::new(60);
        let start = Instant::now();
        assert!(limiter.check_at("carol", Some(5), start).allowed);

        let much_later = start + Duration::from_secs(3600);
        let d = limiter.check_at("carol", Some(5), much_later);
        assert!(d.allowed);
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn test_principals_are_independent() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.check_at("a", None, now).allowed);
        assert!(!limiter.check_at("a", None, now).allowed);
        assert!(limiter.check_at("b", None, now).allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_concurrent_first_use_shares_one_bucket() {
        let limiter = Arc::new(RateLimiter::new(50));
        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| limiter.check_at("shared", None, now).allowed)
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_uses_runtime_clock() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.check("dave", None).allowed);
        }
        assert!(!limiter.check("dave", None).allowed);

        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(limiter.check("dave", None).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_keeps_recent_buckets() {
        let limiter = RateLimiter::new(60);
        limiter.check("old", None);
        tokio::time::advance(Duration::from_secs(600)).await;
        limiter.check("fresh", None);

        assert_eq!(limiter.evict_idle(Duration::from_secs(300)), 1);
        assert_eq!(limiter.bucket_count(), 1);

        limiter.reset("fresh");
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    #[traced_test]
    fn test_denial_is_logged() {
        let limiter = RateLimiter::new(1);
        let now = Instant::now();
        assert!(limiter.check_at("eve", None, now).allowed);
        assert!(!logs_contain("rate_limited"));

        assert!(!limiter.check_at("eve", None, now).allowed);
        assert!(logs_contain("rate_limited"));
    }
}
