use voice_persistence::StoreError;
use voice_scheduler::SchedulerError;

pub type Result<T> = std::result::Result<T, RetryError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RetryError {
    #[error("original call {0} not found")]
    CallNotFound(voice_types::CallId),
    #[error("retry attempt {0} not found")]
    AttemptNotFound(uuid::Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
