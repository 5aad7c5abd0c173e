//! Retry policies for HTTP requests.

use std::time::Duration;

use crate::error::{HttpError, RetryClass};

/// Which retry policy a request runs under.
#[derive(Debug, Clone, Default)]
pub enum RetryMode {
    /// No retries — used for non-idempotent POST endpoints.
    None,
    /// The pipeline's configured policy. Default for GET endpoints.
    #[default]
    Default,
    /// Per-request override.
    Custom(RetryPolicy),
}

/// Outcome classes that may be retried, each independently toggleable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryableConditions {
    /// Client-side timeouts and HTTP 408.
    pub timeout: bool,
    /// HTTP 429.
    pub rate_limited: bool,
    /// HTTP 5xx.
    pub server_error: bool,
    /// Connection refused/reset before any response.
    pub connection: bool,
}

impl Default for RetryableConditions {
    fn default() -> Self {
        Self {
            timeout: true,
            rate_limited: true,
            server_error: true,
            connection: true,
        }
    }
}

impl RetryableConditions {
    pub fn none() -> Self {
        Self {
            timeout: false,
            rate_limited: false,
            server_error: false,
            connection: false,
        }
    }

    pub fn allows(&self, class: RetryClass) -> bool {
        match class {
            RetryClass::Timeout => self.timeout,
            RetryClass::RateLimited => self.rate_limited,
            RetryClass::ServerFault => self.server_error,
            RetryClass::Connection => self.connection,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retry_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per retry.
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Add a random `[0, jitter_max]` to each computed delay.
    pub jitter: bool,
    pub jitter_max: Duration,
    pub conditions: RetryableConditions,
    /// Wait the server's `Retry-After` on 429 instead of the computed delay.
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            jitter_max: Duration::from_millis(500),
            conditions: RetryableConditions::default(),
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retry_attempts: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, multiplier: f64, max: Duration) -> Self {
        self.base_delay = base;
        self.multiplier = multiplier.max(1.0);
        self.max_delay = max;
        self
    }

    pub fn with_jitter(mut self, jitter_max: Option<Duration>) -> Self {
        self.jitter = jitter_max.is_some();
        if let Some(max) = jitter_max {
            self.jitter_max = max;
        }
        self
    }

    pub fn with_conditions(mut self, conditions: RetryableConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    /// Whether `err` matches an enabled retry condition.
    pub fn is_retryable(&self, err: &HttpError) -> bool {
        err.retry_class()
            .is_some_and(|class| self.conditions.allows(class))
    }

    /// `min(base * multiplier^(attempt-1), max)` for the 1-based `attempt`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before retry `attempt` (1-based), jittered when enabled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if !self.jitter || self.jitter_max.is_zero() {
            return base;
        }
        base + self.jitter_max.mul_f64(rand::random::<f64>())
    }

    /// Delay before retrying after `err`, honoring `Retry-After` when enabled.
    pub fn delay_for_error(&self, attempt: u32, err: &HttpError) -> Duration {
        match err.retry_after() {
            Some(server_delay) if self.respect_retry_after => server_delay,
            _ => self.delay_for_attempt(attempt),
        }
    }
}
