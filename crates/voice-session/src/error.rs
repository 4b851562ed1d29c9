//! Session-level errors (§7 "Call-outcome errors", "Internal errors").

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("failed to acquire an STT slot: {0}")]
    SttPool(#[from] voice_pool::PoolError),

    #[error("media sink closed: {0}")]
    MediaSinkClosed(String),

    #[error("no audio activity for the configured max-idle window")]
    Idle,

    #[error("session exceeded the configured max call duration")]
    MaxDurationExceeded,
}

pub type Result<T> = std::result::Result<T, SessionError>;
