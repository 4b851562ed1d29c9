//! The document-store contract (§4.8): atomic single-document updates,
//! compound indexes, append-only transcript growth. `voice-orchestrator`,
//! `voice-scheduler`, `voice-retry` and `voice-webhook` depend only on this
//! trait, never on a concrete backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use voice_types::{Agent, Call, CallDirection, CallId, CallStatus, JobId, JobStatus, RetryAttempt, ScheduledJob, TranscriptTurn};

use crate::error::Result;

/// Filters for `(direction, status, createdAt desc)` queries (§4.8 index).
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub direction: Option<CallDirection>,
    pub status: Option<CallStatus>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub call_id: Option<CallId>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_call(&self, call: Call) -> Result<()>;
    async fn get_call(&self, id: CallId) -> Result<Option<Call>>;
    /// Atomic single-document replace (§4.8 "atomic single-document updates").
    async fn update_call(&self, call: Call) -> Result<()>;
    async fn find_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<Call>>;
    async fn list_calls(&self, filter: CallFilter) -> Result<Vec<Call>>;
    /// Append-only growth of a call's embedded transcript (§4.8 "array-push").
    async fn append_transcript(&self, call_id: CallId, turns: Vec<TranscriptTurn>) -> Result<()>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>>;

    async fn insert_job(&self, job: ScheduledJob) -> Result<()>;
    async fn get_job(&self, id: &JobId) -> Result<Option<ScheduledJob>>;
    async fn update_job(&self, job: ScheduledJob) -> Result<()>;
    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<ScheduledJob>>;
    /// Jobs with `due_at <= now` and status `pending` (§4.8 "(scheduledFor, status)" index).
    async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledJob>>;

    async fn insert_retry_attempt(&self, attempt: RetryAttempt) -> Result<()>;
    async fn get_retry_attempt(&self, id: Uuid) -> Result<Option<RetryAttempt>>;
    async fn update_retry_attempt(&self, attempt: RetryAttempt) -> Result<()>;
    /// Enforces the `(originalCallId, attemptNumber)` unique index (§4.8).
    async fn list_retry_attempts_for_call(&self, original_call_id: CallId) -> Result<Vec<RetryAttempt>>;
}
