//! Circuit breaker — Closed / Open / HalfOpen state machine.
//!
//! Shared by every call through one pipeline. The state lives behind a
//! single lock; callers only see [`CircuitState`] copies and interact through
//! [`CircuitPermit`]s.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::HttpError;

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failures_before_breaking: u32,
    /// How long the circuit stays open before a probe is allowed.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failures_before_breaking: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failures_before_breaking: u32, open_duration: Duration) -> Self {
        Self {
            failures_before_breaking: failures_before_breaking.max(1),
            open_duration,
        }
    }
}

/// Observable circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Fail-fast guard over consecutive call failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    /// Ask to make a call.
    ///
    /// Fails with [`HttpError::CircuitOpen`] while open, or while the single
    /// half-open probe is outstanding.
    pub fn try_acquire(&self) -> Result<CircuitPermit<'_>, HttpError> {
        let mut state = self.state.lock();
        let probe = match *state {
            CircuitState::Closed { .. } => false,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() < self.config.open_duration {
                    return Err(HttpError::CircuitOpen);
                }
                tracing::info!("Circuit half-open, allowing probe");
                *state = CircuitState::HalfOpen {
                    probe_in_flight: true,
                };
                true
            }
            CircuitState::HalfOpen {
                probe_in_flight: true,
            } => return Err(HttpError::CircuitOpen),
            CircuitState::HalfOpen {
                probe_in_flight: false,
            } => {
                *state = CircuitState::HalfOpen {
                    probe_in_flight: true,
                };
                true
            }
        };
        Ok(CircuitPermit {
            breaker: self,
            probe,
            recorded: false,
        })
    }

    fn on_success(&self, probe: bool) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed { .. } => {
                *state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            CircuitState::HalfOpen { .. } if probe => {
                tracing::info!("Circuit closed after successful probe");
                *state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            // Late result of a call admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut state = self.state.lock();
        match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failures_before_breaking {
                    tracing::warn!(
                        failures,
                        open_ms = self.config.open_duration.as_millis() as u64,
                        "Circuit opened"
                    );
                    *state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    *state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            CircuitState::HalfOpen { .. } if probe => {
                tracing::warn!("Probe failed, circuit reopened");
                *state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            _ => {}
        }
    }

    fn release_probe(&self) {
        let mut state = self.state.lock();
        if let CircuitState::HalfOpen {
            probe_in_flight: true,
        } = *state
        {
            *state = CircuitState::HalfOpen {
                probe_in_flight: false,
            };
        }
    }
}

/// Admission to make one call. Record the outcome with [`success`] or
/// [`failure`]; dropping an unrecorded probe frees the probe slot.
///
/// [`success`]: CircuitPermit::success
/// [`failure`]: CircuitPermit::failure
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    recorded: bool,
}

impl CircuitPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.recorded = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.recorded = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded && self.probe {
            self.breaker.release_probe();
        }
    }
}
