//! `ScheduledJob` entity (§3) driving C6.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::call::CallId;

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Canceled,
    Failed,
}

impl JobStatus {
    /// Valid transitions per §3: pending -> processing -> {completed|failed}
    /// or pending -> canceled.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Canceled)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceFrequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: RecurrenceFrequency,
    pub interval: u32,
    pub end_at: Option<DateTime<Utc>>,
    pub max_occurrences: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursPolicy {
    /// "HH:MM" 24-hour local start.
    pub start: String,
    /// "HH:MM" 24-hour local end.
    pub end: String,
    pub timezone: Tz,
    /// 0 = Sunday .. 6 = Saturday, matching `chrono::Weekday::num_days_from_sunday`.
    pub allowed_days: Vec<u8>,
}

/// What a job's due time represents: either kick off a scheduled outbound
/// call, or execute a queued retry attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobKind {
    ScheduledCall { call_id: CallId },
    Retry { retry_attempt_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    pub call_id: CallId,
    pub kind: JobKind,
    pub due_at: DateTime<Utc>,
    pub timezone: Tz,
    pub status: JobStatus,
    pub business_hours_policy: Option<BusinessHoursPolicy>,
    pub recurrence: Option<Recurrence>,
    pub next_run: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub occurrence_count: u32,
}

impl ScheduledJob {
    /// Attempt a status transition, enforcing the lifecycle in §3.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid ScheduledJob transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_processing_is_allowed() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn processing_to_pending_is_rejected() {
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn completed_is_terminal() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn transition_enforced_on_struct() {
        let mut job = ScheduledJob {
            id: "job-1".into(),
            call_id: Uuid::new_v4(),
            kind: JobKind::ScheduledCall {
                call_id: Uuid::new_v4(),
            },
            due_at: Utc::now(),
            timezone: chrono_tz::UTC,
            status: JobStatus::Pending,
            business_hours_policy: None,
            recurrence: None,
            next_run: None,
            processed_at: None,
            occurrence_count: 0,
        };
        assert!(job.transition(JobStatus::Processing).is_ok());
        assert!(job.transition(JobStatus::Canceled).is_err());
        assert!(job.transition(JobStatus::Completed).is_ok());
    }
}
