//! Call routes (§6): initiate, bulk-initiate, get-status, cancel.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use voice_orchestrator::InitiateRequest as CoreInitiateRequest;
use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_types::Call;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes<S: Store, P: TelephonyProvider>() -> Router<AppState<S, P>> {
    Router::new()
        .route("/calls", post(initiate))
        .route("/calls/bulk", post(bulk_initiate))
        .route("/calls/:id", get(get_status))
        .route("/calls/:id/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
pub struct InitiateBody {
    pub phone: String,
    pub agent_id: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub call_id: Uuid,
}

async fn initiate<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Json(body): Json<InitiateBody>,
) -> ApiResult<Json<InitiateResponse>> {
    let call_id = state
        .orchestrator
        .initiate(CoreInitiateRequest {
            phone: body.phone,
            agent_id: body.agent_id,
            metadata: body.metadata,
            parent_call_id: None,
        })
        .await?;
    Ok(Json(InitiateResponse { call_id }))
}

#[derive(Debug, Deserialize)]
pub struct BulkInitiateBody {
    pub calls: Vec<InitiateBody>,
}

#[derive(Debug, Serialize)]
pub struct BulkOutcomeResponse {
    pub index: usize,
    pub call_id: Option<Uuid>,
    pub error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
pub struct BulkInitiateResponse {
    pub results: Vec<BulkOutcomeResponse>,
}

/// A per-item failure never fails the batch (§4.5) -- each outcome is
/// reported individually, the request itself always returns 200.
async fn bulk_initiate<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Json(body): Json<BulkInitiateBody>,
) -> ApiResult<Json<BulkInitiateResponse>> {
    let requests = body
        .calls
        .into_iter()
        .map(|c| CoreInitiateRequest {
            phone: c.phone,
            agent_id: c.agent_id,
            metadata: c.metadata,
            parent_call_id: None,
        })
        .collect();

    let outcomes = state.orchestrator.bulk(requests).await;
    let results = outcomes
        .into_iter()
        .map(|o| match o.result {
            Ok(call_id) => BulkOutcomeResponse {
                index: o.index,
                call_id: Some(call_id),
                error: None,
            },
            Err(err) => BulkOutcomeResponse {
                index: o.index,
                call_id: None,
                error: Some(err.into()),
            },
        })
        .collect();

    Ok(Json(BulkInitiateResponse { results }))
}

async fn get_status<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Call>> {
    let call = state
        .store
        .get_call(id)
        .await?
        .ok_or_else(|| ApiError::new(crate::error::codes::NOT_FOUND, format!("call {id} not found")))?;
    Ok(Json(call))
}

async fn cancel<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.orchestrator.cancel(id).await?;
    Ok(Json(serde_json::json!({ "status": "canceled" })))
}
