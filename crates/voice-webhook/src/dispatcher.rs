//! Webhook dispatcher (C9): turns provider status callbacks into Call
//! lifecycle transitions and C7 retry triggers (§4.9).

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_orchestrator::Orchestrator;
use voice_retry::RetryEngine;
use voice_types::{Call, CallStatus};

use crate::dedup::DedupCache;
use crate::error::{Result, WebhookError};
use crate::event::ProviderStatusEvent;
use crate::mapping::map_provider_status;

pub struct WebhookDispatcher<S, P> {
    store: Arc<S>,
    orchestrator: Arc<Orchestrator<S, P>>,
    retry: Arc<RetryEngine<S>>,
    dedup: DedupCache,
    auto_retry: bool,
}

impl<S: Store, P: TelephonyProvider> WebhookDispatcher<S, P> {
    pub fn new(
        store: Arc<S>,
        orchestrator: Arc<Orchestrator<S, P>>,
        retry: Arc<RetryEngine<S>>,
        auto_retry: bool,
    ) -> Self {
        Self {
            store,
            orchestrator,
            retry,
            dedup: DedupCache::new(),
            auto_retry,
        }
    }

    #[instrument(skip(self, event), fields(provider_call_id = %event.provider_call_id, status = %event.status))]
    pub async fn handle(&self, event: ProviderStatusEvent) -> Result<()> {
        let mut call = self.locate_call(&event).await?;

        if !self.dedup.observe(&event.provider_call_id, &event.status) {
            info!("duplicate webhook delivery ignored");
            return Ok(());
        }

        let mapping = map_provider_status(&event.status);
        let now = Utc::now();
        let was_already_terminal = call.status.is_terminal();

        if mapping.sub_status.is_some() {
            call.outbound_sub_status = mapping.sub_status;
        }
        if let Some(recording_url) = event.recording_url {
            call.recording_url = Some(recording_url);
        }

        if mapping.is_terminal() {
            call.finalize(mapping.call_status, mapping.failure_reason, now);
            if let Some(duration) = event.duration {
                call.duration_secs = Some(duration as i64);
            }
        } else if !was_already_terminal {
            call.status = mapping.call_status;
        }

        self.store.update_call(call.clone()).await?;

        if mapping.is_terminal() {
            self.orchestrator.on_terminal_status(call.id);
        }

        if !was_already_terminal
            && matches!(mapping.call_status, CallStatus::Failed | CallStatus::Canceled)
        {
            if let Some(reason) = mapping.failure_reason {
                if self.auto_retry {
                    self.retry.schedule_retry(&call, reason).await?;
                }
            }
        }

        Ok(())
    }

    async fn locate_call(&self, event: &ProviderStatusEvent) -> Result<Call> {
        if let Some(call) = self.store.find_call_by_provider_id(&event.provider_call_id).await? {
            return Ok(call);
        }
        if let Some(custom_field) = &event.custom_field {
            if let Ok(id) = Uuid::parse_str(custom_field) {
                if let Some(call) = self.store.get_call(id).await? {
                    return Ok(call);
                }
            }
        }
        warn!("no call matched provider_call_id or custom_field");
        Err(WebhookError::UnknownCall)
    }
}
