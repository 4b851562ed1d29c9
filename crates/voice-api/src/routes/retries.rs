//! Retry routes (§6, §4.7): retry-manual, retry-history.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_types::{FailureReason, RetryAttempt};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes<S: Store, P: TelephonyProvider>() -> Router<AppState<S, P>> {
    Router::new()
        .route("/calls/:id/retry", post(retry_manual))
        // Not one of the ten named operations, but `cancelRetries` (§4.7)
        // has no other caller-facing surface once auto-retry fires it.
        .route("/calls/:id/retries", get(retry_history).delete(cancel_retries))
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryManualBody {
    /// Defaults to the call's own recorded failure reason when omitted.
    #[serde(default)]
    pub reason: Option<FailureReason>,
}

async fn retry_manual<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RetryManualBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let call = state
        .store
        .get_call(id)
        .await?
        .ok_or_else(|| ApiError::new(crate::error::codes::NOT_FOUND, format!("call {id} not found")))?;

    let reason = body
        .reason
        .or(call.failure_reason)
        .ok_or_else(|| ApiError::new(crate::error::codes::RETRY_NOT_SCHEDULED, "call has no failure reason to retry"))?;

    let attempt_id = state.retry.schedule_retry(&call, reason).await?;
    match attempt_id {
        Some(attempt_id) => Ok(Json(serde_json::json!({ "retry_attempt_id": attempt_id }))),
        None => Err(ApiError::new(
            crate::error::codes::RETRY_NOT_SCHEDULED,
            "failure reason is not retryable, or the attempt cap has been reached",
        )),
    }
}

async fn retry_history<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<RetryAttempt>>> {
    let attempts = state.retry.list_attempts(id).await?;
    Ok(Json(attempts))
}

async fn cancel_retries<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let canceled = state.retry.cancel_retries(id).await?;
    Ok(Json(serde_json::json!({ "canceled": canceled })))
}
