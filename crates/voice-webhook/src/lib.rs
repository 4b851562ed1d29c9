//! Webhook dispatcher (C9): translates provider status callbacks into Call
//! lifecycle updates, active-calls cleanup, and C7 retry triggers (§4.9).

mod dedup;
mod dispatcher;
mod error;
mod event;
mod mapping;

pub use dedup::DedupCache;
pub use dispatcher::WebhookDispatcher;
pub use error::{Result, WebhookError};
pub use event::ProviderStatusEvent;
pub use mapping::{map_provider_status, StatusMapping};
