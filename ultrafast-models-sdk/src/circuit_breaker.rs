//! # Circuit Breaker
//!
//! A per-provider three-state breaker that prevents the resilient HTTP
//! client (§4.D) from hammering a provider that is already failing.
//!
//! ## States
//!
//! - **Closed**: normal operation. Every failure increments a counter,
//!   reset on any success; reaching `failure_threshold` opens the circuit.
//! - **Open**: calls are rejected locally (`allow()` returns `false`)
//!   without contacting the upstream. After `timeout` has elapsed since the
//!   last recorded failure, the next `allow()` call flips the breaker to
//!   half-open and permits exactly one probe.
//! - **Half-open**: at most one in-flight probe at a time; `success_threshold`
//!   consecutive successes close the circuit again; any failure reopens it.
//!
//! Deciding *which* outcomes count as a failure (5xx, 429, network errors —
//! but not other 4xx) is the resilient client's job, not this module's; the
//! breaker itself just tracks state transitions given `record_success()`/
//! `record_failure()` calls.
//!
//! ```rust
//! use ultrafast_models_sdk::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("openai".to_string(), CircuitBreakerConfig::default());
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(with = "crate::common::duration_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    half_open_in_flight: bool,
    last_failure_time: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    half_open_success_count: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_in_flight: false,
                last_failure_time: None,
            }),
            half_open_success_count: AtomicU32::new(0),
        }
    }

    /// Whether a call is currently permitted. Open→half_open transition and
    /// half-open's single-probe admission both happen atomically here, so
    /// the read and the transition can't race with a concurrent caller.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.config.timeout)
                    .unwrap_or(false);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = true;
                    self.half_open_success_count.store(0, Ordering::SeqCst);
                    tracing::info!(breaker = %self.name, "circuit breaker half-open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight {
                    false
                } else {
                    inner.half_open_in_flight = true;
                    true
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = false;
                let successes = self.half_open_success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    tracing::info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker open"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = false;
                inner.state = CircuitState::Open;
                tracing::warn!(breaker = %self.name, "circuit breaker reopened");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn force_open(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Open;
        inner.last_failure_time = Some(Instant::now());
    }

    pub async fn force_closed(&self) {
        let mut inner = self.inner.write().await;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_in_flight = false;
        inner.last_failure_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            timeout,
        }
    }

    #[tokio::test]
    async fn closed_allows_calls_and_resets_on_success() {
        let cb = CircuitBreaker::new("t".into(), config(3, 2, Duration::from_secs(30)));
        assert!(cb.allow().await);
        cb.record_failure().await;
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new("t".into(), config(3, 2, Duration::from_secs(30)));
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow().await);
    }

    #[tokio::test]
    async fn half_open_single_probe_then_closes_after_success_threshold() {
        let cb = CircuitBreaker::new("t".into(), config(1, 2, Duration::from_millis(20)));
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        // A second concurrent probe is not admitted while one is in flight.
        assert!(!cb.allow().await);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.allow().await);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("t".into(), config(1, 2, Duration::from_millis(10)));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.allow().await);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn force_open_and_force_closed() {
        let cb = CircuitBreaker::new("t".into(), config(5, 2, Duration::from_secs(30)));
        cb.force_open().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        cb.force_closed().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
    }
}
