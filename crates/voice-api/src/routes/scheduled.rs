//! Scheduled-call routes (§6, §4.6): schedule, list-scheduled, reschedule,
//! cancel-scheduled.
//!
//! `schedule` itself isn't one of the ten operations §6 enumerates by name,
//! but §3 says a ScheduledJob is "created by the scheduling API or C7" --
//! without it, list/reschedule/cancel-scheduled would have nothing to act
//! on. It builds the Call record directly rather than through
//! [`voice_orchestrator::Orchestrator::initiate`], since that dials
//! immediately.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use voice_persistence::{JobFilter, Store};
use voice_provider::TelephonyProvider;
use voice_scheduler::ScheduleOptions;
use voice_types::{Call, CallDirection, CallStatus, InputError, JobId, JobStatus, OutboundSubStatus, PhoneNumber, ScheduledJob};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes<S: Store, P: TelephonyProvider>() -> Router<AppState<S, P>> {
    Router::new()
        .route("/scheduled", post(schedule).get(list_scheduled))
        .route("/scheduled/:job_id", post(reschedule))
        .route("/scheduled/:job_id/cancel", post(cancel_scheduled))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    pub phone: String,
    pub agent_id: String,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub timezone: Option<chrono_tz::Tz>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub call_id: voice_types::CallId,
    pub job_id: JobId,
}

async fn schedule<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Json(body): Json<ScheduleBody>,
) -> ApiResult<Json<ScheduleResponse>> {
    let now = Utc::now();
    if body.due_at <= now {
        return Err(InputError::ScheduleInPast(body.due_at).into());
    }

    let phone = PhoneNumber::parse(&body.phone).map_err(InputError::from)?;
    state
        .store
        .get_agent(&body.agent_id)
        .await?
        .filter(|a| a.active)
        .ok_or_else(|| InputError::AgentNotFound(body.agent_id.clone()))?;

    let call = Call {
        id: uuid::Uuid::new_v4(),
        direction: CallDirection::Outbound,
        phone,
        agent_id: body.agent_id,
        status: CallStatus::Initiated,
        outbound_sub_status: Some(OutboundSubStatus::Queued),
        created_at: now,
        scheduled_for: Some(body.due_at),
        initiated_at: None,
        started_at: None,
        ended_at: None,
        duration_secs: None,
        retry_count: 0,
        retry_of: None,
        failure_reason: None,
        provider_call_id: None,
        recording_url: None,
        metadata: body.metadata,
    };
    state.store.insert_call(call.clone()).await?;

    let job_id = state
        .scheduler
        .schedule(
            call.id,
            body.due_at,
            ScheduleOptions {
                timezone: body.timezone,
                business_hours_policy: None,
                recurrence: None,
            },
        )
        .await?;

    Ok(Json(ScheduleResponse {
        call_id: call.id,
        job_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListScheduledQuery {
    pub status: Option<JobStatus>,
}

async fn list_scheduled<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Query(query): Query<ListScheduledQuery>,
) -> ApiResult<Json<Vec<ScheduledJob>>> {
    let jobs = state
        .scheduler
        .list(JobFilter {
            status: query.status,
            call_id: None,
        })
        .await?;
    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
    pub due_at: DateTime<Utc>,
}

async fn reschedule<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(job_id): Path<JobId>,
    Json(body): Json<RescheduleBody>,
) -> ApiResult<Json<Value>> {
    if body.due_at <= Utc::now() {
        return Err(InputError::ScheduleInPast(body.due_at).into());
    }
    state.scheduler.reschedule(&job_id, body.due_at).await?;
    Ok(Json(serde_json::json!({ "status": "rescheduled" })))
}

async fn cancel_scheduled<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<Value>> {
    state.scheduler.cancel(&job_id).await?;
    Ok(Json(serde_json::json!({ "status": "canceled" })))
}
