//! Stats route (§6, §4.6 "stats (waiting, active, completed, failed, delayed)").

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_scheduler::SchedulerStats;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes<S: Store, P: TelephonyProvider>() -> Router<AppState<S, P>> {
    Router::new().route("/stats", get(stats))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_outbound_calls: usize,
    pub scheduler: SchedulerStats,
}

async fn stats<S: Store, P: TelephonyProvider>(
    State(state): State<AppState<S, P>>,
) -> ApiResult<Json<StatsResponse>> {
    let scheduler = state.scheduler.stats().await?;
    Ok(Json(StatsResponse {
        active_outbound_calls: state.orchestrator.active_call_count(),
        scheduler,
    }))
}
