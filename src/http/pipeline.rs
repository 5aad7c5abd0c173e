//! Resilience pipeline — rate limiter, circuit breaker, retry loop.
//!
//! `execute` runs one logical request:
//! 1. take a rate-limit permit (fail fast with `Throttled` if none)
//! 2. pass the circuit breaker (fail fast with `CircuitOpen` if open)
//! 3. run the call, retrying retry-eligible failures with backoff
//!
//! The circuit records the final outcome of the whole request, not every
//! attempt. Backoff waits hold no shared lock.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{HttpError, HttpResult};
use crate::http::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::http::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::http::retry::{RetryMode, RetryPolicy};

/// Retry, circuit breaking, and client-side rate limiting around a call.
#[derive(Debug, Default)]
pub struct ResiliencePipeline {
    retry: RetryPolicy,
    circuit: Option<CircuitBreaker>,
    limiter: Option<RateLimiter>,
}

impl ResiliencePipeline {
    /// Retry only; no circuit breaker or rate limiter.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            circuit: None,
            limiter: None,
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit = Some(CircuitBreaker::new(config));
        self
    }

    pub fn with_rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.limiter = Some(RateLimiter::new(config));
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit.as_ref().map(CircuitBreaker::state)
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_ref()
    }

    /// Run `op` under the pipeline's default retry policy.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> HttpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HttpResult<T>>,
    {
        self.execute_with(&RetryMode::Default, cancel, op).await
    }

    /// Run `op` under `mode`. `op` is invoked once per attempt.
    pub async fn execute_with<T, F, Fut>(
        &self,
        mode: &RetryMode,
        cancel: &CancellationToken,
        op: F,
    ) -> HttpResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HttpResult<T>>,
    {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(cancel).await?;
        }

        let permit = match &self.circuit {
            Some(circuit) => Some(circuit.try_acquire()?),
            None => None,
        };

        let none = RetryPolicy::none();
        let policy = match mode {
            RetryMode::None => &none,
            RetryMode::Default => &self.retry,
            RetryMode::Custom(policy) => policy,
        };

        let result = run_with_retry(policy, cancel, op).await;

        if let Some(permit) = permit {
            match &result {
                Ok(_) => permit.success(),
                // Never attempted to completion; the outcome says nothing.
                Err(HttpError::Cancelled) => drop(permit),
                Err(e) if e.is_fault() => permit.failure(),
                Err(_) => permit.success(),
            }
        }
        result
    }
}

async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> HttpResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HttpResult<T>>,
{
    let mut retries = 0u32;
    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            outcome = op() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !policy.is_retryable(&e) => return Err(e),
            Err(e) => e,
        };

        if retries >= policy.max_retry_attempts {
            if retries == 0 {
                return Err(err);
            }
            tracing::warn!(attempts = retries + 1, error = %err, "Retries exhausted");
            return Err(HttpError::MaxRetriesExceeded {
                attempts: retries + 1,
                last_error: Box::new(err),
            });
        }

        retries += 1;
        let delay = policy.delay_for_error(retries, &err);
        tracing::debug!(
            attempt = retries,
            max = policy.max_retry_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying request"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(HttpError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
