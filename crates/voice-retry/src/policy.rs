//! Failure taxonomy and delay policy (§4.7).

use std::time::Duration;

use voice_types::FailureReason;

/// One row of the §4.7 policy table.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retryable: bool,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    /// Per-class delay cap before jitter is applied.
    pub cap: Duration,
    /// "yes (once, immediate)" for connection-lost: retryable but never
    /// delayed and capped at one attempt regardless of `max_attempts`.
    pub immediate_once: bool,
}

const MEDIUM_CAP: Duration = Duration::from_secs(60 * 60);
const NETWORK_CAP: Duration = Duration::from_secs(15 * 60);

/// Looks up the policy row for `reason`. Reasons outside the table
/// (`invalid-number`, `canceled`) are non-retryable by construction.
pub fn policy_for(reason: FailureReason) -> RetryPolicy {
    match reason {
        FailureReason::NoAnswer => RetryPolicy {
            retryable: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
            cap: MEDIUM_CAP,
            immediate_once: false,
        },
        FailureReason::Busy => RetryPolicy {
            retryable: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(10 * 60),
            backoff_multiplier: 2.0,
            cap: MEDIUM_CAP,
            immediate_once: false,
        },
        FailureReason::Voicemail => RetryPolicy {
            retryable: true,
            max_attempts: 2,
            base_delay: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            cap: MEDIUM_CAP,
            immediate_once: false,
        },
        FailureReason::NetworkError => RetryPolicy {
            retryable: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            cap: NETWORK_CAP,
            immediate_once: false,
        },
        FailureReason::RateLimited => RetryPolicy {
            retryable: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            cap: NETWORK_CAP,
            immediate_once: false,
        },
        FailureReason::ApiUnavailable => RetryPolicy {
            retryable: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            cap: NETWORK_CAP,
            immediate_once: false,
        },
        FailureReason::ConnectionLost => RetryPolicy {
            retryable: true,
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            cap: Duration::ZERO,
            immediate_once: true,
        },
        FailureReason::NoResponse => RetryPolicy {
            retryable: true,
            max_attempts: 3,
            base_delay: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
            cap: MEDIUM_CAP,
            immediate_once: false,
        },
        FailureReason::InvalidNumber | FailureReason::Canceled => RetryPolicy {
            retryable: false,
            max_attempts: 0,
            base_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            cap: Duration::ZERO,
            immediate_once: false,
        },
    }
}

/// `delay = base * backoff^(attempt-1)`, capped, then ±10% uniform jitter
/// (§4.7). `attempt` is 1-based.
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    if policy.immediate_once {
        return Duration::ZERO;
    }
    let exponent = attempt.saturating_sub(1) as i32;
    let raw_secs = policy.base_delay.as_secs_f64() * policy.backoff_multiplier.powi(exponent);
    let capped_secs = raw_secs.min(policy.cap.as_secs_f64());
    let jitter = 1.0 + rand::random::<f64>() * 0.2 - 0.1;
    Duration::from_secs_f64((capped_secs * jitter).max(0.0))
}
