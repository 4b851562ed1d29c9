//! Scheduler errors (§4.6).

use thiserror::Error;

use crate::JobId;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {0} is not pending and cannot be rescheduled or canceled")]
    NotPending(JobId),

    #[error(transparent)]
    Store(#[from] voice_persistence::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
