//! Retry engine (C7): failure taxonomy, backoff/jitter delay calculation,
//! `scheduleRetry`/`cancelRetries`, wired to C6 for dispatch.

mod error;
mod policy;
mod retry;

pub use error::{Result, RetryError};
pub use policy::{delay_for_attempt, policy_for, RetryPolicy};
pub use retry::{RetryConfig, RetryEngine};
