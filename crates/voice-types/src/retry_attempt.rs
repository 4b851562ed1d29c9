//! `RetryAttempt` entity (§3) driving C7.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::call::{CallId, FailureReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAttemptStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub id: Uuid,
    pub original_call_id: CallId,
    pub retry_call_id: Option<CallId>,
    /// 1-based attempt number. `(original_call_id, attempt_number)` is
    /// unique per §3.
    pub attempt_number: u32,
    pub due_at: DateTime<Utc>,
    pub status: RetryAttemptStatus,
    pub failure_reason: FailureReason,
}

impl RetryAttempt {
    pub fn new(
        original_call_id: CallId,
        attempt_number: u32,
        due_at: DateTime<Utc>,
        failure_reason: FailureReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_call_id,
            retry_call_id: None,
            attempt_number,
            due_at,
            status: RetryAttemptStatus::Pending,
            failure_reason,
        }
    }

    /// Deterministic job id for C6, so duplicate dispatch is a no-op (§4.6
    /// "Exactly-once semantics").
    pub fn job_id(&self) -> String {
        format!("retry-{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_deterministic() {
        let attempt = RetryAttempt::new(Uuid::new_v4(), 1, Utc::now(), FailureReason::NoAnswer);
        assert_eq!(attempt.job_id(), format!("retry-{}", attempt.id));
    }

    #[test]
    fn new_attempt_starts_pending() {
        let attempt = RetryAttempt::new(Uuid::new_v4(), 1, Utc::now(), FailureReason::Busy);
        assert_eq!(attempt.status, RetryAttemptStatus::Pending);
        assert!(attempt.retry_call_id.is_none());
    }
}
