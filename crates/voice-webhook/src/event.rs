use serde::{Deserialize, Serialize};

/// Raw provider status callback (§4.9): `{providerCallId, status,
/// customField, duration?, recordingUrl?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatusEvent {
    pub provider_call_id: String,
    pub status: String,
    /// Our internal call id, round-tripped through `customField` (§4.3).
    pub custom_field: Option<String>,
    pub duration: Option<u64>,
    pub recording_url: Option<String>,
}
