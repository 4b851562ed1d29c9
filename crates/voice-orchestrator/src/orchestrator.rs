//! `initiate`/`cancel`/`bulk` (§4.5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use voice_persistence::Store;
use voice_provider::{MakeCallRequest, ProviderError, TelephonyProvider};
use voice_types::{Call, CallStatus, FailureReason, PhoneNumber};

use crate::active_calls::ActiveCalls;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub phone: String,
    pub agent_id: String,
    pub metadata: Value,
    pub parent_call_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_outbound: u32,
    pub virtual_number: String,
    pub app_id: String,
    pub bulk_min_inter_initiation_gap: Duration,
}

/// One item's outcome from [`Orchestrator::bulk`]: a failure here never
/// fails the batch (§4.5 "the batch itself does not fail").
pub struct BulkOutcome {
    pub index: usize,
    pub result: Result<Uuid>,
}

pub struct Orchestrator<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    active_calls: ActiveCalls,
    config: OrchestratorConfig,
}

impl<S: Store, P: TelephonyProvider> Orchestrator<S, P> {
    pub fn new(store: Arc<S>, provider: Arc<P>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            provider,
            active_calls: ActiveCalls::new(),
            config,
        }
    }

    pub fn active_call_count(&self) -> usize {
        self.active_calls.len()
    }

    /// Steps 1-7 of §4.5, each failure aborting with a specific error.
    #[instrument(skip(self, req), fields(agent_id = %req.agent_id))]
    pub async fn initiate(&self, req: InitiateRequest) -> Result<Uuid> {
        let now = Utc::now();

        // 1. E.164 validation.
        let phone = PhoneNumber::parse(&req.phone).map_err(voice_types::InputError::from)?;

        // 2. Agent must exist and be active.
        let agent = self
            .store
            .get_agent(&req.agent_id)
            .await?
            .filter(|a| a.active)
            .ok_or_else(|| voice_types::InputError::AgentNotFound(req.agent_id.clone()))?;

        // 3. Global concurrency cap. Reserved atomically -- sweep, check,
        // and insert under one lock acquisition -- so two concurrent
        // `initiate` calls can never both observe room for the last slot;
        // the reservation is held for the call's whole lifetime (released
        // by `cancel`/`on_terminal_status`, or unwound below on any early
        // failure) rather than registered only after the dial succeeds.
        let call_id = Uuid::new_v4();
        if !self
            .active_calls
            .try_reserve(call_id, now, self.config.max_concurrent_outbound as usize)
        {
            return Err(OrchestratorError::ConcurrentLimitReached);
        }

        // 4. Call record.
        let retry_of = match req.parent_call_id {
            Some(parent_id) => match self.store.get_call(parent_id).await {
                Ok(Some(parent)) => Some((parent_id, parent.retry_count)),
                Ok(None) => {
                    self.active_calls.remove(call_id);
                    return Err(OrchestratorError::CallNotFound(parent_id));
                }
                Err(err) => {
                    self.active_calls.remove(call_id);
                    return Err(err.into());
                }
            },
            None => None,
        };
        let mut call = Call::new_outbound(phone, agent.id.clone(), retry_of, now, req.metadata);
        call.id = call_id;
        if let Err(err) = self.store.insert_call(call.clone()).await {
            self.active_calls.remove(call_id);
            return Err(err.into());
        }

        // 5. Dial out.
        let make_call = self.provider.make_call(MakeCallRequest {
            from: self.config.virtual_number.clone(),
            to: call.phone.as_str().to_string(),
            app_id: self.config.app_id.clone(),
            custom_field: call_id.to_string(),
        });
        match make_call.await {
            Ok(resp) => {
                call.provider_call_id = Some(resp.provider_call_id);
                if let Err(err) = self.store.update_call(call).await {
                    self.active_calls.remove(call_id);
                    return Err(err.into());
                }
            }
            Err(err) => {
                let reason = failure_reason_for(&err);
                call.finalize(CallStatus::Failed, Some(reason), Utc::now());
                let _ = self.store.update_call(call).await;
                self.active_calls.remove(call_id);
                warn!(%call_id, %err, "make_call failed, call marked failed");
                return Err(OrchestratorError::Provider(err));
            }
        }

        info!(%call_id, "call initiated");
        Ok(call_id)
    }

    /// Valid only from `{initiated, ringing}` (§4.5).
    pub async fn cancel(&self, call_id: Uuid) -> Result<()> {
        let mut call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or(OrchestratorError::CallNotFound(call_id))?;

        if !matches!(call.status, CallStatus::Initiated | CallStatus::Ringing) {
            return Err(OrchestratorError::InvalidCallState {
                id: call_id,
                status: call.status,
                expected: "initiated or ringing",
            });
        }

        if let Some(provider_call_id) = call.provider_call_id.clone() {
            self.provider.hangup(&provider_call_id).await?;
        }
        call.finalize(CallStatus::Canceled, Some(FailureReason::Canceled), Utc::now());
        self.store.update_call(call).await?;
        self.active_calls.remove(call_id);
        Ok(())
    }

    /// Up to 1000 requests, dispatched with a minimum inter-initiation gap
    /// so the rate limiter in C3 isn't the bottleneck for bulk usability
    /// (§4.5).
    pub async fn bulk(&self, requests: Vec<InitiateRequest>) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for (index, req) in requests.into_iter().take(1000).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.bulk_min_inter_initiation_gap).await;
            }
            let result = self.initiate(req).await;
            outcomes.push(BulkOutcome { index, result });
        }
        outcomes
    }

    /// Removes a call the webhook dispatcher (C9) has just seen reach a
    /// terminal status; C9 calls this directly.
    pub fn on_terminal_status(&self, call_id: Uuid) {
        self.active_calls.remove(call_id);
    }

    /// Dials an already-persisted scheduled call when its due job fires
    /// (C6). Unlike `initiate`, the `Call` record already exists -- built
    /// by the scheduling API -- so this only runs steps 3 and 5-6 of §4.5
    /// against it instead of constructing a new one.
    #[instrument(skip(self))]
    pub async fn dispatch_scheduled(&self, call_id: Uuid) -> Result<()> {
        let mut call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or(OrchestratorError::CallNotFound(call_id))?;

        if call.status.is_terminal() {
            return Ok(());
        }
        if call.initiated_at.is_some() {
            return Ok(());
        }

        let now = Utc::now();
        if !self
            .active_calls
            .try_reserve(call_id, now, self.config.max_concurrent_outbound as usize)
        {
            return Err(OrchestratorError::ConcurrentLimitReached);
        }

        call.initiated_at = Some(now);
        let make_call = self.provider.make_call(MakeCallRequest {
            from: self.config.virtual_number.clone(),
            to: call.phone.as_str().to_string(),
            app_id: self.config.app_id.clone(),
            custom_field: call_id.to_string(),
        });
        match make_call.await {
            Ok(resp) => {
                call.provider_call_id = Some(resp.provider_call_id);
                if let Err(err) = self.store.update_call(call).await {
                    self.active_calls.remove(call_id);
                    return Err(err.into());
                }
            }
            Err(err) => {
                let reason = failure_reason_for(&err);
                call.finalize(CallStatus::Failed, Some(reason), Utc::now());
                let _ = self.store.update_call(call).await;
                self.active_calls.remove(call_id);
                warn!(%call_id, %err, "scheduled dial failed, call marked failed");
                return Err(OrchestratorError::Provider(err));
            }
        }

        info!(%call_id, "scheduled call dispatched");
        Ok(())
    }
}

/// How a make-call failure maps onto the durable `Call` record (§4.5 step
/// 5 names rate-limited/api-unavailable explicitly; other provider errors
/// are treated as network errors since they are equally an infrastructure
/// failure rather than a caller mistake).
fn failure_reason_for(err: &ProviderError) -> FailureReason {
    match err {
        ProviderError::RateLimited => FailureReason::RateLimited,
        ProviderError::ApiUnavailable => FailureReason::ApiUnavailable,
        _ => FailureReason::NetworkError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voice_persistence::MemoryStore;
    use voice_provider::{CallDetails, MakeCallResponse};
    use voice_types::{Agent, LlmSelection, VoiceSelection};

    struct FakeProvider {
        fail_to: Option<String>,
        calls_made: AtomicUsize,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                fail_to: None,
                calls_made: AtomicUsize::new(0),
            }
        }

        fn failing_for(to: &str) -> Self {
            Self {
                fail_to: Some(to.to_string()),
                calls_made: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TelephonyProvider for FakeProvider {
        async fn make_call(&self, req: MakeCallRequest) -> std::result::Result<MakeCallResponse, ProviderError> {
            self.calls_made.fetch_add(1, Ordering::SeqCst);
            if self.fail_to.as_deref() == Some(req.to.as_str()) {
                return Err(ProviderError::RateLimited);
            }
            Ok(MakeCallResponse {
                provider_call_id: format!("CA-{}", req.custom_field),
                status: "queued".to_string(),
            })
        }

        async fn hangup(&self, _provider_call_id: &str) -> std::result::Result<(), ProviderError> {
            Ok(())
        }

        async fn get_details(&self, _provider_call_id: &str) -> std::result::Result<CallDetails, ProviderError> {
            Ok(CallDetails {
                status: "completed".into(),
                duration: Some(10),
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
            persona_prompt: "You are helpful.".into(),
            greeting: None,
            end_phrases: vec![],
            goodbye_line: None,
            voice: VoiceSelection {
                provider: "provider-a".into(),
                voice_id: "v1".into(),
            },
            llm: LlmSelection {
                provider: "provider-a".into(),
                model: "m1".into(),
            },
            language: "en-US".into(),
            knowledge_base_id: None,
        }
    }

    async fn orchestrator_with(
        provider: FakeProvider,
        max_concurrent_outbound: u32,
    ) -> (Orchestrator<MemoryStore, FakeProvider>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.seed_agent(agent());
        let config = OrchestratorConfig {
            max_concurrent_outbound,
            virtual_number: "+15005550006".into(),
            app_id: "app-1".into(),
            bulk_min_inter_initiation_gap: Duration::ZERO,
        };
        (
            Orchestrator::new(store.clone(), Arc::new(provider), config),
            store,
        )
    }

    fn request() -> InitiateRequest {
        InitiateRequest {
            phone: "+14155552671".into(),
            agent_id: "agent-1".into(),
            metadata: Value::Null,
            parent_call_id: None,
        }
    }

    #[tokio::test]
    async fn initiate_succeeds_and_registers_active_call() {
        let (orchestrator, store) = orchestrator_with(FakeProvider::new(), 10).await;
        let call_id = orchestrator.initiate(request()).await.unwrap();
        assert_eq!(orchestrator.active_call_count(), 1);
        let call = store.get_call(call_id).await.unwrap().unwrap();
        assert!(call.provider_call_id.is_some());
        assert_eq!(call.status, CallStatus::Initiated);
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected() {
        let (orchestrator, _store) = orchestrator_with(FakeProvider::new(), 10).await;
        let mut req = request();
        req.phone = "not-a-number".into();
        let err = orchestrator.initiate(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Input(_)));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected() {
        let (orchestrator, _store) = orchestrator_with(FakeProvider::new(), 10).await;
        let mut req = request();
        req.agent_id = "missing".into();
        let err = orchestrator.initiate(req).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Input(_)));
    }

    #[tokio::test]
    async fn concurrency_cap_is_enforced() {
        let (orchestrator, _store) = orchestrator_with(FakeProvider::new(), 1).await;
        orchestrator.initiate(request()).await.unwrap();
        let err = orchestrator.initiate(request()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ConcurrentLimitReached));
    }

    #[tokio::test]
    async fn make_call_failure_marks_the_call_failed_and_does_not_register() {
        let (orchestrator, store) = orchestrator_with(FakeProvider::failing_for("+14155552671"), 10).await;
        let err = orchestrator.initiate(request()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Provider(ProviderError::RateLimited)));
        assert_eq!(orchestrator.active_call_count(), 0);
        let calls = store
            .list_calls(voice_persistence::CallFilter::default())
            .await
            .unwrap();
        assert_eq!(calls[0].status, CallStatus::Failed);
        assert_eq!(calls[0].failure_reason, Some(FailureReason::RateLimited));
    }

    #[tokio::test]
    async fn cancel_rejects_terminal_calls() {
        let (orchestrator, _store) = orchestrator_with(FakeProvider::new(), 10).await;
        let call_id = orchestrator.initiate(request()).await.unwrap();
        orchestrator.cancel(call_id).await.unwrap();
        let err = orchestrator.cancel(call_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidCallState { .. }));
    }

    #[tokio::test]
    async fn bulk_reports_partial_failure_without_failing_the_batch() {
        let (orchestrator, _store) = orchestrator_with(FakeProvider::failing_for("+14155552671"), 10).await;
        let mut ok_req = request();
        ok_req.phone = "+442079460000".into();
        let requests = vec![request(), ok_req];
        let outcomes = orchestrator.bulk(requests).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
    }
}
