//! Retry scheduling and cancellation (§4.7).

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use voice_persistence::Store;
use voice_scheduler::{JobKind, ScheduleOptions, Scheduler};
use voice_types::config::OffPeakConfig;
use voice_types::{
    BusinessHoursPolicy, Call, CallId, FailureReason, JobStatus, RetryAttempt, RetryAttemptStatus,
    ScheduledJob,
};

use crate::error::{Result, RetryError};
use crate::policy::{delay_for_attempt, policy_for};

/// Configuration the retry engine needs beyond what's already on the
/// scheduler: off-peak shifting and the retry-of-retry gate (§4.7, §6).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub off_peak: OffPeakConfig,
    pub auto_retry_for_retries: bool,
    /// The source's retry table disagrees with itself on whether voicemail
    /// is retryable at all (one document says yes/2 attempts, another says
    /// no). Resolved behind this flag, default off — voicemail pickup is
    /// treated as a answered, non-retryable outcome unless a deployment
    /// opts in.
    pub voicemail_retryable: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            off_peak: OffPeakConfig::default(),
            auto_retry_for_retries: false,
            voicemail_retryable: false,
        }
    }
}

impl From<&OffPeakConfig> for BusinessHoursPolicy {
    fn from(off_peak: &OffPeakConfig) -> Self {
        BusinessHoursPolicy {
            start: off_peak.start.clone(),
            end: off_peak.end.clone(),
            timezone: off_peak.timezone,
            allowed_days: off_peak.allowed_days.clone(),
        }
    }
}

/// `scheduleRetry` / `cancelRetries` (§4.7), wired to C6 for dispatch.
pub struct RetryEngine<S> {
    store: Arc<S>,
    scheduler: Arc<Scheduler<S>>,
    config: RetryConfig,
}

impl<S: Store> RetryEngine<S> {
    pub fn new(store: Arc<S>, scheduler: Arc<Scheduler<S>>, config: RetryConfig) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    /// Schedules a retry for `call` which just failed with `reason`.
    /// Returns `None` when the failure isn't retryable, the per-call attempt
    /// cap is reached, or this call is itself a retry and
    /// `auto_retry_for_retries` is disabled.
    #[instrument(skip(self, call), fields(call_id = %call.id))]
    pub async fn schedule_retry(&self, call: &Call, reason: FailureReason) -> Result<Option<Uuid>> {
        if !reason.is_retryable_class() {
            info!(%reason, "failure reason is not retryable");
            return Ok(None);
        }
        let policy = policy_for(reason);
        if !policy.retryable {
            return Ok(None);
        }
        if reason == FailureReason::Voicemail && !self.config.voicemail_retryable {
            info!("voicemail pickup treated as non-retryable by configuration");
            return Ok(None);
        }
        if call.retry_of.is_some() && !self.config.auto_retry_for_retries {
            info!("retry-of-retry disallowed by configuration");
            return Ok(None);
        }

        let existing = self.store.list_retry_attempts_for_call(call.id).await?;
        let attempt_number = existing.len() as u32 + 1;
        if attempt_number > policy.max_attempts {
            info!(attempt_number, max = policy.max_attempts, "retry attempt cap reached");
            return Ok(None);
        }

        let delay = delay_for_attempt(&policy, attempt_number);
        let mut due_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        if self.config.off_peak.enabled {
            let off_peak_policy: BusinessHoursPolicy = (&self.config.off_peak).into();
            due_at = voice_scheduler::adjust_for_business_hours(due_at, &off_peak_policy);
        }

        let attempt = RetryAttempt::new(call.id, attempt_number, due_at, reason);
        self.store.insert_retry_attempt(attempt.clone()).await?;

        let job = ScheduledJob {
            id: attempt.job_id(),
            call_id: call.id,
            kind: JobKind::Retry {
                retry_attempt_id: attempt.id,
            },
            due_at,
            timezone: self.config.off_peak.timezone,
            status: JobStatus::Pending,
            business_hours_policy: None,
            recurrence: None,
            next_run: None,
            processed_at: None,
            occurrence_count: 0,
        };
        self.scheduler.enqueue(job).await?;

        info!(attempt_id = %attempt.id, %due_at, "retry scheduled");
        Ok(Some(attempt.id))
    }

    /// Cancels every still-pending retry attempt for `original_call_id`.
    #[instrument(skip(self))]
    pub async fn cancel_retries(&self, original_call_id: CallId) -> Result<u32> {
        let attempts = self.store.list_retry_attempts_for_call(original_call_id).await?;
        let mut canceled = 0;
        for mut attempt in attempts {
            if attempt.status != RetryAttemptStatus::Pending {
                continue;
            }
            attempt.status = RetryAttemptStatus::Canceled;
            let job_id = attempt.job_id();
            self.store.update_retry_attempt(attempt).await?;
            if let Err(err) = self.scheduler.cancel(&job_id).await {
                warn!(%job_id, %err, "failed to cancel underlying scheduled job");
            }
            canceled += 1;
        }
        Ok(canceled)
    }

    /// Loads a retry attempt, erroring if it doesn't exist. Convenience for
    /// callers (e.g. the HTTP layer's retry-history endpoint).
    pub async fn get_attempt(&self, id: Uuid) -> Result<RetryAttempt> {
        self.store
            .get_retry_attempt(id)
            .await?
            .ok_or(RetryError::AttemptNotFound(id))
    }

    pub async fn list_attempts(&self, original_call_id: CallId) -> Result<Vec<RetryAttempt>> {
        Ok(self.store.list_retry_attempts_for_call(original_call_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use voice_persistence::MemoryStore;

    fn config(enabled_off_peak: bool, auto_retry_for_retries: bool) -> RetryConfig {
        RetryConfig {
            off_peak: OffPeakConfig {
                enabled: enabled_off_peak,
                start: "00:00".into(),
                end: "23:59".into(),
                timezone: chrono_tz::UTC,
                allowed_days: vec![0, 1, 2, 3, 4, 5, 6],
            },
            auto_retry_for_retries,
            voicemail_retryable: false,
        }
    }

    fn call() -> Call {
        Call::new_outbound(
            voice_types::PhoneNumber::parse("+14155552671").unwrap(),
            "agent-1".into(),
            None,
            Utc::now(),
            Value::Null,
        )
    }

    fn engine(store: Arc<MemoryStore>, cfg: RetryConfig) -> RetryEngine<MemoryStore> {
        let scheduler = Arc::new(Scheduler::new(store.clone()));
        RetryEngine::new(store, scheduler, cfg)
    }

    #[tokio::test]
    async fn non_retryable_reason_schedules_nothing() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, config(false, false));
        let outcome = engine
            .schedule_retry(&call(), FailureReason::InvalidNumber)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn retryable_reason_schedules_an_attempt() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), config(false, false));
        let target = call();
        let outcome = engine.schedule_retry(&target, FailureReason::NoAnswer).await.unwrap();
        assert!(outcome.is_some());
        let attempts = store.list_retry_attempts_for_call(target.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn retry_of_retry_is_rejected_by_default() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, config(false, false));
        let mut retried_call = call();
        retried_call.retry_of = Some(Uuid::new_v4());
        let outcome = engine
            .schedule_retry(&retried_call, FailureReason::Busy)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn retry_of_retry_is_allowed_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, config(false, true));
        let mut retried_call = call();
        retried_call.retry_of = Some(Uuid::new_v4());
        let outcome = engine
            .schedule_retry(&retried_call, FailureReason::Busy)
            .await
            .unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn attempt_cap_stops_further_retries() {
        let store = Arc::new(MemoryStore::new());
        let mut cfg = config(false, false);
        cfg.voicemail_retryable = true;
        let engine = engine(store.clone(), cfg);
        let voicemail_call = call();
        // Voicemail policy allows 2 attempts once opted in.
        let first = engine
            .schedule_retry(&voicemail_call, FailureReason::Voicemail)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = engine
            .schedule_retry(&voicemail_call, FailureReason::Voicemail)
            .await
            .unwrap();
        assert!(second.is_some());
        let third = engine
            .schedule_retry(&voicemail_call, FailureReason::Voicemail)
            .await
            .unwrap();
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn voicemail_is_non_retryable_by_default() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, config(false, false));
        let outcome = engine
            .schedule_retry(&call(), FailureReason::Voicemail)
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn cancel_retries_cancels_only_pending_attempts() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), config(false, false));
        let target = call();
        let attempt_id = engine
            .schedule_retry(&target, FailureReason::NoAnswer)
            .await
            .unwrap()
            .unwrap();

        let canceled = engine.cancel_retries(target.id).await.unwrap();
        assert_eq!(canceled, 1);

        let attempt = engine.get_attempt(attempt_id).await.unwrap();
        assert_eq!(attempt.status, RetryAttemptStatus::Canceled);

        let again = engine.cancel_retries(target.id).await.unwrap();
        assert_eq!(again, 0);
    }
}
