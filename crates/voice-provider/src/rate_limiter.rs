//! Token-bucket rate limiter in front of the telephony provider API (§4.3).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Bucket capacity (also the default reservoir).
    pub reservoir: u32,
    /// Tokens added per second.
    pub refill_per_sec: u32,
    /// Maximum concurrently in-flight requests.
    pub max_in_flight: u32,
    /// Minimum gap enforced between any two outgoing requests.
    pub min_gap: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            reservoir: 20,
            refill_per_sec: 20,
            max_in_flight: 10,
            min_gap: Duration::from_millis(50),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_request: Option<Instant>,
}

/// Token-bucket rate limiter plus an in-flight semaphore and a minimum
/// inter-request gap, matching §4.3's shape. All outgoing provider requests
/// pass through [`RateLimiter::acquire`].
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
    in_flight: Arc<Semaphore>,
}

/// Held for the duration of one outgoing request; releases the in-flight
/// slot on drop.
pub struct RateLimitPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight as usize));
        Self {
            state: Mutex::new(BucketState {
                tokens: f64::from(config.reservoir),
                last_refill: Instant::now(),
                last_request: None,
            }),
            config,
            in_flight,
        }
    }

    /// Wait until a token, an in-flight slot, and the minimum gap since the
    /// last request are all available.
    pub async fn acquire(&self) -> RateLimitPermit {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                let gap_wait = state.last_request.map_or(Duration::ZERO, |last| {
                    let elapsed = last.elapsed();
                    self.config.min_gap.saturating_sub(elapsed)
                });

                if gap_wait > Duration::ZERO {
                    Some(gap_wait)
                } else if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    state.last_request = Some(Instant::now());
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    let secs = deficit / f64::from(self.config.refill_per_sec.max(1));
                    Some(Duration::from_secs_f64(secs))
                }
            };

            match wait {
                Some(d) => tokio::time::sleep(d).await,
                None => break,
            }
        }

        RateLimitPermit { _permit: permit }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let add = elapsed * f64::from(self.config.refill_per_sec);
        state.tokens = (state.tokens + add).min(f64::from(self.config.reservoir));
        state.last_refill = Instant::now();
    }
}
