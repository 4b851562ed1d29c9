//! Server assembly: router composition, middleware layering, graceful
//! shutdown. Mirrors the teacher's `ApiServer`/`ApiConfig` split so the
//! binary crate only needs to build an [`AppState`] and call [`ApiServer::run`].

use std::future::Future;
use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Json, Router};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use voice_persistence::Store;
use voice_provider::TelephonyProvider;

use crate::middleware as mw;
use crate::routes::api_router;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Rejects request bodies larger than this (default 1 MiB -- these are
    /// small JSON control-plane requests, never media).
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ApiConfig {
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

pub struct ApiServer<S, P> {
    config: ApiConfig,
    state: AppState<S, P>,
    router: Router,
}

impl<S: Store + 'static, P: TelephonyProvider + 'static> ApiServer<S, P> {
    pub fn new(state: AppState<S, P>, config: ApiConfig) -> Self {
        let router = Self::build_router(state.clone(), &config);
        Self {
            config,
            state,
            router,
        }
    }

    fn build_router(state: AppState<S, P>, config: &ApiConfig) -> Router {
        let api = api_router(state);

        let health = Router::new().route("/healthz", get(healthz));

        let router = Router::new().merge(health).merge(Router::new().nest("/api/v1", api));

        // Applied in reverse -- the last `.layer` call runs first.
        router
            .layer(middleware::from_fn(mw::error_logging_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(mw::request_id_middleware))
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    pub fn state(&self) -> &AppState<S, P> {
        &self.state
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "voice-api listening");
        axum::serve(listener, self.router).await
    }

    pub async fn run_until<F>(self, shutdown_signal: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "voice-api listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        info!("voice-api shut down");
        Ok(())
    }
}

async fn healthz() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode as Status};
    use tower::util::ServiceExt;
    use uuid::Uuid;

    use voice_orchestrator::{Orchestrator, OrchestratorConfig};
    use voice_persistence::MemoryStore;
    use voice_provider::{CallDetails, MakeCallRequest, MakeCallResponse, ProviderError};
    use voice_retry::{RetryConfig, RetryEngine};
    use voice_scheduler::Scheduler;
    use voice_types::{Agent, LlmSelection, VoiceSelection};

    struct FakeProvider;

    #[async_trait]
    impl TelephonyProvider for FakeProvider {
        async fn make_call(&self, req: MakeCallRequest) -> std::result::Result<MakeCallResponse, ProviderError> {
            Ok(MakeCallResponse {
                provider_call_id: format!("CA-{}", req.custom_field),
                status: "queued".into(),
            })
        }
        async fn hangup(&self, _provider_call_id: &str) -> std::result::Result<(), ProviderError> {
            Ok(())
        }
        async fn get_details(&self, _provider_call_id: &str) -> std::result::Result<CallDetails, ProviderError> {
            Ok(CallDetails {
                status: "completed".into(),
                duration: Some(1),
                direction: "outbound".into(),
            })
        }
        async fn get_recording_url(&self, _provider_call_id: &str) -> std::result::Result<Option<String>, ProviderError> {
            Ok(None)
        }
    }

    fn agent() -> Agent {
        Agent {
            id: "agent-1".into(),
            active: true,
            persona_prompt: "You are Sam.".into(),
            greeting: None,
            end_phrases: vec![],
            goodbye_line: None,
            voice: VoiceSelection {
                provider: "provider-a".into(),
                voice_id: "v1".into(),
            },
            llm: LlmSelection {
                provider: "openai".into(),
                model: "gpt-4".into(),
            },
            language: "en-US".into(),
            knowledge_base_id: None,
        }
    }

    fn server() -> ApiServer<MemoryStore, FakeProvider> {
        let store = Arc::new(MemoryStore::new());
        store.seed_agent(agent());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(FakeProvider),
            OrchestratorConfig {
                max_concurrent_outbound: 10,
                virtual_number: "+14150000000".into(),
                app_id: "app".into(),
                bulk_min_inter_initiation_gap: std::time::Duration::from_millis(0),
            },
        ));
        let scheduler = Arc::new(Scheduler::new(store.clone()));
        let retry = Arc::new(RetryEngine::new(store.clone(), scheduler.clone(), RetryConfig::default()));
        let state = AppState::new(store, orchestrator, scheduler, retry);
        ApiServer::new(state, ApiConfig::default())
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let router = server().router();
        let request = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), Status::OK);
    }

    #[tokio::test]
    async fn initiate_then_get_status_round_trips() {
        let router = server().router();
        let body = serde_json::json!({ "phone": "+14155552671", "agent_id": "agent-1" });
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/calls")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), Status::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let call_id = parsed["call_id"].as_str().unwrap();

        let request = Request::builder()
            .uri(format!("/api/v1/calls/{call_id}"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), Status::OK);
    }

    #[tokio::test]
    async fn get_status_for_unknown_call_is_404() {
        let router = server().router();
        let request = Request::builder()
            .uri(format!("/api/v1/calls/{}", Uuid::new_v4()))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), Status::NOT_FOUND);
    }

    #[tokio::test]
    async fn initiate_with_unknown_agent_is_404() {
        let router = server().router();
        let body = serde_json::json!({ "phone": "+14155552671", "agent_id": "no-such-agent" });
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/calls")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), Status::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_reports_scheduler_counters() {
        let router = server().router();
        let request = Request::builder().uri("/api/v1/stats").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), Status::OK);
    }
}
