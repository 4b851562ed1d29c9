//! `POST /webhooks/status` (§4.9): the telephony provider's status
//! callback, handed straight to [`voice_webhook::WebhookDispatcher`].

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_webhook::{ProviderStatusEvent, WebhookDispatcher};

pub struct WebhookState<S, P> {
    pub dispatcher: Arc<WebhookDispatcher<S, P>>,
}

impl<S, P> Clone for WebhookState<S, P> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

pub fn routes<S: Store + 'static, P: TelephonyProvider + 'static>() -> Router<WebhookState<S, P>> {
    Router::new().route("/webhooks/status", post(handle_status))
}

async fn handle_status<S: Store, P: TelephonyProvider>(
    State(state): State<WebhookState<S, P>>,
    Json(event): Json<ProviderStatusEvent>,
) -> Json<serde_json::Value> {
    if let Err(err) = state.dispatcher.handle(event).await {
        tracing::warn!(%err, "webhook dispatch failed");
    }
    Json(serde_json::json!({ "status": "received" }))
}
