//! Shared application state injected into every handler via `State<...>`.

use std::sync::Arc;

use voice_orchestrator::Orchestrator;
use voice_persistence::Store;
use voice_provider::TelephonyProvider;
use voice_retry::RetryEngine;
use voice_scheduler::Scheduler;

pub struct AppState<S, P> {
    pub store: Arc<S>,
    pub orchestrator: Arc<Orchestrator<S, P>>,
    pub scheduler: Arc<Scheduler<S>>,
    pub retry: Arc<RetryEngine<S>>,
}

impl<S, P> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            orchestrator: self.orchestrator.clone(),
            scheduler: self.scheduler.clone(),
            retry: self.retry.clone(),
        }
    }
}

impl<S: Store, P: TelephonyProvider> AppState<S, P> {
    pub fn new(
        store: Arc<S>,
        orchestrator: Arc<Orchestrator<S, P>>,
        scheduler: Arc<Scheduler<S>>,
        retry: Arc<RetryEngine<S>>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            scheduler,
            retry,
        }
    }
}
