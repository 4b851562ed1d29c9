//! Route handlers, organized by resource: calls, scheduled jobs, retries, stats.

pub mod calls;
pub mod retries;
pub mod scheduled;
pub mod stats;

use axum::Router;

use voice_persistence::Store;
use voice_provider::TelephonyProvider;

use crate::state::AppState;

/// The complete API router, nested under `/api/v1`.
pub fn api_router<S: Store + 'static, P: TelephonyProvider + 'static>(
    state: AppState<S, P>,
) -> Router {
    Router::new()
        .merge(calls::routes())
        .merge(scheduled::routes())
        .merge(retries::routes())
        .merge(stats::routes())
        .with_state(state)
}
