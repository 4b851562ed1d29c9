//! The `Call` entity (§3) and its lifecycle enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::phone::PhoneNumber;

/// Unique identifier for a [`Call`].
pub type CallId = Uuid;

/// Direction of a call relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Top-level lifecycle status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl CallStatus {
    /// Terminal statuses are append-only: once reached, a Call may not be
    /// mutated into a different status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::Canceled
        )
    }
}

/// Sub-status tracked only for outbound calls, mirroring the provider's own
/// dial progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundSubStatus {
    Queued,
    Ringing,
    Connected,
    NoAnswer,
    Busy,
    Voicemail,
}

/// Reasons a call ended in `failed` (or, for `canceled`, the explicit
/// cancellation reason).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoAnswer,
    Busy,
    Voicemail,
    InvalidNumber,
    NetworkError,
    RateLimited,
    ApiUnavailable,
    Canceled,
    NoResponse,
    ConnectionLost,
}

impl FailureReason {
    /// Whether the retry engine (C7) considers this reason retryable at all,
    /// per the failure taxonomy in §4.7. Some reasons outside that table
    /// (e.g. `Canceled`) are never retryable.
    pub fn is_retryable_class(self) -> bool {
        !matches!(self, FailureReason::InvalidNumber | FailureReason::Canceled)
    }
}

/// Durable record for one phone call, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub direction: CallDirection,
    pub phone: PhoneNumber,
    pub agent_id: String,
    pub status: CallStatus,
    pub outbound_sub_status: Option<OutboundSubStatus>,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub retry_count: u32,
    pub retry_of: Option<CallId>,
    pub failure_reason: Option<FailureReason>,
    pub provider_call_id: Option<String>,
    pub recording_url: Option<String>,
    pub metadata: Value,
}

impl Call {
    /// Build a fresh outbound call record (step 4 of C5's `initiate`).
    pub fn new_outbound(
        phone: PhoneNumber,
        agent_id: String,
        retry_of: Option<(CallId, u32)>,
        now: DateTime<Utc>,
        metadata: Value,
    ) -> Self {
        let (retry_of_id, retry_count) = match retry_of {
            Some((id, parent_retry_count)) => (Some(id), parent_retry_count + 1),
            None => (None, 0),
        };
        Self {
            id: Uuid::new_v4(),
            direction: CallDirection::Outbound,
            phone,
            agent_id,
            status: CallStatus::Initiated,
            outbound_sub_status: Some(OutboundSubStatus::Queued),
            created_at: now,
            scheduled_for: None,
            initiated_at: Some(now),
            started_at: None,
            ended_at: None,
            duration_secs: None,
            retry_count,
            retry_of: retry_of_id,
            failure_reason: None,
            provider_call_id: None,
            recording_url: None,
            metadata,
        }
    }

    /// Invariant (a): if `retry_of` is set, `retry_count` must equal the
    /// parent's `retry_count + 1`. Checked at construction time by
    /// [`Call::new_outbound`]; exposed here for validation of records
    /// arriving from persistence.
    pub fn retry_count_consistent(&self, parent_retry_count: Option<u32>) -> bool {
        match (self.retry_of, parent_retry_count) {
            (Some(_), Some(parent)) => self.retry_count == parent + 1,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }

    /// Mark the call as started (socket connected / media began).
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.status = CallStatus::InProgress;
        self.started_at = Some(at);
    }

    /// Finalise the call into a terminal status. No-ops (returns `false`) if
    /// the call is already terminal, preserving the append-only invariant.
    pub fn finalize(
        &mut self,
        status: CallStatus,
        reason: Option<FailureReason>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        debug_assert!(status.is_terminal(), "finalize requires a terminal status");
        self.status = status;
        self.failure_reason = reason;
        self.ended_at = Some(at);
        if let Some(started) = self.started_at {
            let started = started.min(at);
            self.started_at = Some(started);
            self.duration_secs = Some((at - started).num_seconds().max(0));
        }
        true
    }
}
