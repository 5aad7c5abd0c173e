//! HTTP layer — resilience pipeline and the REST client.
//!
//! The pipeline (retry, circuit breaker, rate limiter) is always compiled and
//! can wrap any async call. The `reqwest`-backed [`HttpClient`] needs the
//! `http` feature.

pub mod circuit;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;

#[cfg(feature = "http")]
pub mod client;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitPermit, CircuitState};
pub use pipeline::ResiliencePipeline;
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryMode, RetryPolicy, RetryableConditions};

#[cfg(feature = "http")]
pub use client::{HttpClient, StaticToken, TokenProvider};
