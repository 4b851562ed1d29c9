//! Bridges [`voice_scheduler::JobDispatchHandler`] to C5's dial logic and
//! C7's retry attempts. Lives here rather than in `voice-retry` because
//! `voice-retry` deliberately doesn't depend on `voice-orchestrator` (its
//! own doc comment: avoid a dependency cycle) -- `voice-server`, which
//! already depends on both, is the natural place to wire them together.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use voice_orchestrator::{InitiateRequest, Orchestrator};
use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_retry::RetryEngine;
use voice_scheduler::JobDispatchHandler;
use voice_types::{CallId, RetryAttemptStatus};

pub struct VoiceJobDispatcher<S, P> {
    store: Arc<S>,
    orchestrator: Arc<Orchestrator<S, P>>,
    retry: Arc<RetryEngine<S>>,
}

impl<S: Store, P: TelephonyProvider> VoiceJobDispatcher<S, P> {
    pub fn new(store: Arc<S>, orchestrator: Arc<Orchestrator<S, P>>, retry: Arc<RetryEngine<S>>) -> Self {
        Self {
            store,
            orchestrator,
            retry,
        }
    }
}

#[async_trait]
impl<S: Store, P: TelephonyProvider> JobDispatchHandler for VoiceJobDispatcher<S, P> {
    async fn handle_scheduled_call(&self, call_id: CallId) -> Result<(), String> {
        self.orchestrator
            .dispatch_scheduled(call_id)
            .await
            .map_err(|err| err.to_string())
    }

    async fn handle_retry(&self, retry_attempt_id: Uuid) -> Result<(), String> {
        let mut attempt = self
            .retry
            .get_attempt(retry_attempt_id)
            .await
            .map_err(|err| err.to_string())?;

        if attempt.status != RetryAttemptStatus::Pending {
            info!(%retry_attempt_id, ?attempt.status, "retry attempt no longer pending, skipping dispatch");
            return Ok(());
        }

        let original = self
            .store
            .get_call(attempt.original_call_id)
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("original call {} not found", attempt.original_call_id))?;

        let outcome = self
            .orchestrator
            .initiate(InitiateRequest {
                phone: original.phone.as_str().to_string(),
                agent_id: original.agent_id.clone(),
                metadata: original.metadata.clone(),
                parent_call_id: Some(original.id),
            })
            .await;

        match outcome {
            Ok(new_call_id) => {
                attempt.retry_call_id = Some(new_call_id);
                attempt.status = RetryAttemptStatus::Completed;
                self.store
                    .update_retry_attempt(attempt)
                    .await
                    .map_err(|err| err.to_string())?;
                Ok(())
            }
            Err(err) => {
                warn!(%retry_attempt_id, %err, "retry dial failed");
                attempt.status = RetryAttemptStatus::Failed;
                if let Err(store_err) = self.store.update_retry_attempt(attempt).await {
                    warn!(%retry_attempt_id, %store_err, "failed to record failed retry attempt");
                }
                Err(err.to_string())
            }
        }
    }
}
