//! Three-state circuit breaker around the telephony provider API (§4.3).

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// True once a half-open probe has been handed out, so only one probe
    /// is in flight at a time.
    probe_in_flight: bool,
}

/// closed -> open after `failure_threshold` consecutive failures; open ->
/// half-open after `cooldown`; half-open -> closed on success, -> open on
/// failure (§4.3).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

/// Whether the caller may proceed with a request right now.
pub enum Admission {
    Proceed,
    /// Fail fast; the circuit is open.
    FailFast,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Check whether a request should be admitted, transitioning open ->
    /// half-open once the cooldown has elapsed.
    pub async fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Admission::Proceed,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::FailFast
                } else {
                    inner.probe_in_flight = true;
                    Admission::Proceed
                }
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(Duration::MAX, |t| t.elapsed());
                if elapsed >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Admission::Proceed
                } else {
                    Admission::FailFast
                }
            }
        }
    }

    pub async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
        }
    }

    pub async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening after consecutive failures"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}
