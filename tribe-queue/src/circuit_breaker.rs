//! Circuit breaker around the email provider
//!
//! Stops a provider outage from turning every queued job into a burst of
//! doomed requests.
//!
//! # State Transitions
//!
//! ```text
//! ┌─────────┐  failure_threshold failures  ┌──────┐
//! │ Closed  │ ──────────────────────────>  │ Open │ <─┐
//! └─────────┘                              └──────┘   │
//!     ^                                        │      │
//!     │ success_threshold successes            │ timeout elapsed
//!     │                                        v      │
//!     │                              ┌───────────┐    │ any failure
//!     └──────────────────────────────│ Half-Open │ ───┘
//!                                    └───────────┘
//! ```
//!
//! One breaker is shared by every worker of a queue instance. State lives
//! in memory only and starts closed on every restart.

use std::{
    fmt,
    future::Future,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close it again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// How long the circuit stays open before probing (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    2
}

const fn default_timeout_ms() -> u64 {
    60_000
}

/// Externally visible breaker mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Tripped, calls are rejected without reaching the provider
    Open,
    /// Probing recovery
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
enum Breaker {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

impl Breaker {
    const fn state(&self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Rejection or failure from [`CircuitBreaker::call`]
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The wrapped function was not invoked
    #[error("circuit breaker is open")]
    Open,

    /// The wrapped function ran and failed
    #[error(transparent)]
    Inner(E),
}

/// Snapshot of the breaker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Consecutive failures while closed
    pub failure_count: u32,
    /// Consecutive successes while half-open
    pub consecutive_successes: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: parking_lot::Mutex<Breaker>,
}

impl CircuitBreaker {
    #[must_use]
    pub const fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: parking_lot::Mutex::new(Breaker::Closed { failures: 0 }),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a call may proceed
    ///
    /// Moves an expired Open circuit to Half-Open, in which case the call is
    /// the probe. Half-Open admits every caller until the probes settle.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            Breaker::Closed { .. } | Breaker::HalfOpen { .. } => true,
            Breaker::Open { since } => {
                if since.elapsed() >= self.config.timeout() {
                    *state = Breaker::HalfOpen { successes: 0 };
                    drop(state);
                    info!("Circuit breaker entering HALF-OPEN state - testing recovery");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    ///
    /// Returns `true` if the circuit transitioned to Closed
    pub fn record_success(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            Breaker::Closed { .. } => {
                *state = Breaker::Closed { failures: 0 };
                false
            }
            Breaker::HalfOpen { successes } => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    *state = Breaker::Closed { failures: 0 };
                    drop(state);
                    info!(
                        successes,
                        "Circuit breaker CLOSED - normal operation resumed"
                    );
                    true
                } else {
                    *state = Breaker::HalfOpen { successes };
                    false
                }
            }
            Breaker::Open { .. } => {
                // A call admitted before the circuit opened finished late
                false
            }
        }
    }

    /// Record a failed call
    ///
    /// Returns `true` if the circuit transitioned to Open
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            Breaker::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    *state = Breaker::Open {
                        since: Instant::now(),
                    };
                    drop(state);
                    warn!(
                        failure_count = failures,
                        threshold = self.config.failure_threshold,
                        timeout_ms = self.config.timeout_ms,
                        "Circuit breaker OPENED - rejecting provider calls"
                    );
                    true
                } else {
                    *state = Breaker::Closed { failures };
                    false
                }
            }
            Breaker::HalfOpen { .. } => {
                *state = Breaker::Open {
                    since: Instant::now(),
                };
                drop(state);
                warn!("Circuit breaker probe failed - reopening circuit");
                true
            }
            Breaker::Open { .. } => false,
        }
    }

    /// Run `f` through the breaker
    ///
    /// A successful `Ok` closes toward health and an `Err` counts as a
    /// failure. While open, `f` is never invoked.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Open);
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), Breaker::Closed { failures: 0 });
        if previous.state() != CircuitState::Closed {
            info!(previous = %previous.state(), "Circuit breaker manually reset to CLOSED");
        }
    }

    /// Current mode, without advancing an expired Open circuit
    pub fn state(&self) -> CircuitState {
        self.state.lock().state()
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = *self.state.lock();
        let (failure_count, consecutive_successes) = match state {
            Breaker::Closed { failures } => (failures, 0),
            Breaker::Open { .. } => (0, 0),
            Breaker::HalfOpen { successes } => (0, successes),
        };

        CircuitBreakerStats {
            state: state.state(),
            failure_count,
            consecutive_successes,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn breaker(failure_threshold: u32, success_threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            timeout_ms,
        })
    }

    #[test]
    fn test_closed_to_open() {
        let breaker = breaker(3, 1, 60_000);

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());

        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.stats().failure_count, 2);

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = breaker(3, 1, 60_000);

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_needs_success_threshold() {
        let breaker = breaker(2, 2, 0);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Zero timeout: the next call is the probe
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(!breaker.record_success());
        assert_eq!(breaker.stats().consecutive_successes, 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(breaker.record_success());
        assert_eq!(
            breaker.stats(),
            CircuitBreakerStats {
                state: CircuitState::Closed,
                failure_count: 0,
                consecutive_successes: 0,
            }
        );
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = breaker(2, 2, 0);

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.try_acquire());
        breaker.record_success();

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().consecutive_successes, 0);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let breaker = breaker(1, 1, 50);

        breaker.record_failure();
        assert!(!breaker.try_acquire());

        std::thread::sleep(Duration::from_millis(80));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_reset_forces_closed() {
        let breaker = breaker(1, 1, 60_000);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
    }

    #[tokio::test]
    async fn test_call_skips_function_while_open() {
        let breaker = breaker(5, 2, 60_000);
        let invocations = AtomicU32::new(0);

        for _ in 0..5 {
            let result: Result<(), CircuitError<&str>> = breaker
                .call(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err("provider down")
                })
                .await;
            assert!(matches!(result, Err(CircuitError::Inner("provider down"))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        let result: Result<(), CircuitError<&str>> = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CircuitError::Open)));
        assert_eq!(invocations.load(Ordering::SeqCst), 5);
    }
    #[tokio::test]
    async fn test_call_probes_once_timeout_elapses() {
        let breaker = breaker(1, 2, 50);
        let invocations = AtomicU32::new(0);
        let succeed = || async {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        };

        let result = breaker.call(|| async { Err::<(), _>("provider down") }).await;
        assert!(matches!(result, Err(CircuitError::Inner(_))));
        assert!(matches!(breaker.call(succeed).await, Err(CircuitError::Open)));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(breaker.call(succeed).await.is_ok());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(breaker.call(succeed).await.is_ok());
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
