//! Orchestrator errors (§4.5, §7).

use thiserror::Error;
use uuid::Uuid;
use voice_types::CallStatus;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    #[error(transparent)]
    Input(#[from] voice_types::InputError),

    #[error("max concurrent outbound calls reached")]
    ConcurrentLimitReached,

    #[error("call {id} is in status {status:?}, not {expected:?}")]
    InvalidCallState {
        id: Uuid,
        status: CallStatus,
        expected: &'static str,
    },

    #[error("call not found: {0}")]
    CallNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] voice_persistence::StoreError),

    #[error(transparent)]
    Provider(#[from] voice_provider::ProviderError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
