//! Client-side rate limiter — a token bucket refilled on a fixed window.
//!
//! `permit_limit` tokens are available per bucket; every `replenish_period`
//! the bucket gains `tokens_per_period` (capped at `permit_limit`). Callers
//! that find it empty may wait, but only `queue_limit` of them at a time and
//! for at most `max_wait`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{HttpError, HttpResult};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub permit_limit: u32,
    pub replenish_period: Duration,
    pub tokens_per_period: u32,
    /// Callers allowed to wait for a token at once. Zero means fail fast.
    pub queue_limit: usize,
    pub max_wait: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            permit_limit: 10,
            replenish_period: Duration::from_secs(1),
            tokens_per_period: 10,
            queue_limit: 32,
            max_wait: Duration::from_secs(5),
        }
    }
}

impl RateLimiterConfig {
    /// `permits` per `period`, refilled in full each window.
    pub fn per_period(permits: u32, period: Duration) -> Self {
        Self {
            permit_limit: permits.max(1),
            replenish_period: period,
            tokens_per_period: permits.max(1),
            ..Default::default()
        }
    }

    pub fn with_queue(mut self, queue_limit: usize, max_wait: Duration) -> Self {
        self.queue_limit = queue_limit;
        self.max_wait = max_wait;
        self
    }

    pub fn with_tokens_per_period(mut self, tokens: u32) -> Self {
        self.tokens_per_period = tokens.max(1);
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
    waiting: usize,
}

/// Token bucket admission gate.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let bucket = Bucket {
            tokens: config.permit_limit,
            last_refill: Instant::now(),
            waiting: 0,
        };
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Tokens available right now.
    pub fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Take a token without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock();
        self.take(&mut bucket)
    }

    /// Take a token, waiting in the bounded queue if the bucket is empty.
    ///
    /// Fails with [`HttpError::Throttled`] when the queue is full or the wait
    /// exceeds `max_wait`, and with [`HttpError::Cancelled`] on cancellation.
    pub async fn acquire(&self, cancel: &CancellationToken) -> HttpResult<()> {
        let mut next_refill = {
            let mut bucket = self.bucket.lock();
            if self.take(&mut bucket) {
                return Ok(());
            }
            if bucket.waiting >= self.config.queue_limit {
                tracing::debug!(waiting = bucket.waiting, "Rate limit queue full");
                return Err(HttpError::Throttled);
            }
            bucket.waiting += 1;
            bucket.last_refill + self.config.replenish_period
        };
        let _slot = WaitSlot { limiter: self };
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(HttpError::Cancelled),
                _ = tokio::time::sleep_until(next_refill.min(deadline)) => {}
            }

            let mut bucket = self.bucket.lock();
            if self.take(&mut bucket) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::debug!(
                    max_wait_ms = self.config.max_wait.as_millis() as u64,
                    "Rate limit wait exceeded"
                );
                return Err(HttpError::Throttled);
            }
            next_refill = bucket.last_refill + self.config.replenish_period;
        }
    }

    fn take(&self, bucket: &mut Bucket) -> bool {
        self.refill(bucket);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let period = self.config.replenish_period;
        if period.is_zero() {
            bucket.tokens = self.config.permit_limit;
            return;
        }
        let elapsed = bucket.last_refill.elapsed();
        let periods = (elapsed.as_nanos() / period.as_nanos()) as u64;
        if periods == 0 {
            return;
        }
        let added = periods.saturating_mul(self.config.tokens_per_period as u64);
        bucket.tokens = (bucket.tokens as u64 + added).min(self.config.permit_limit as u64) as u32;
        bucket.last_refill += period.saturating_mul(periods.min(u32::MAX as u64) as u32);
    }
}

struct WaitSlot<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        let mut bucket = self.limiter.bucket.lock();
        bucket.waiting = bucket.waiting.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_exhausts_and_refills() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_period(2, Duration::from_secs(1)));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_next_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_period(1, Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let start = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_fails_fast() {
        let config = RateLimiterConfig::per_period(1, Duration::from_secs(10))
            .with_queue(0, Duration::from_secs(1));
        let limiter = RateLimiter::new(config);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let start = Instant::now();
        assert!(matches!(limiter.acquire(&cancel).await, Err(HttpError::Throttled)));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded() {
        let config = RateLimiterConfig::per_period(1, Duration::from_secs(10))
            .with_queue(4, Duration::from_secs(2));
        let limiter = RateLimiter::new(config);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let start = Instant::now();
        assert!(matches!(limiter.acquire(&cancel).await, Err(HttpError::Throttled)));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(limiter.bucket.lock().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_period(1, Duration::from_secs(10)));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();
        cancel.cancel();
        assert!(matches!(limiter.acquire(&cancel).await, Err(HttpError::Cancelled)));
    }
}
