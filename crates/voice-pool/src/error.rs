//! Errors for C1/C2 (§4.1, §4.2, §7 "Capacity errors").

use thiserror::Error;

/// Errors `SttPool::acquire` can return. A `ProviderError` does not consume
/// a slot; `PoolTimeout`/`QueueFull` report distinct conditions so a caller
/// can choose a fallback (§4.1).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    #[error("STT pool queue timed out after waiting")]
    PoolTimeout,

    #[error("STT pool queue is full (max {max_queue_len})")]
    QueueFull { max_queue_len: u32 },

    #[error("upstream STT provider failed to create connection: {0}")]
    ProviderError(String),
}

/// Errors `TtsQueue::synthesize` can return: whatever the task callback
/// raised, propagated after the slot is released (§4.2).
#[derive(Debug, Error)]
#[error("TTS synthesis task failed: {0}")]
pub struct SynthesisError(pub String);
