//! Provider status string -> internal `CallStatus`/`OutboundSubStatus`/
//! `FailureReason` mapping (§4.9).

use voice_types::{CallStatus, FailureReason, OutboundSubStatus};

/// The outcome of mapping one provider status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusMapping {
    pub call_status: CallStatus,
    pub sub_status: Option<OutboundSubStatus>,
    pub failure_reason: Option<FailureReason>,
}

impl StatusMapping {
    pub fn is_terminal(&self) -> bool {
        self.call_status.is_terminal()
    }
}

/// Maps a raw provider status string (as seen in `{from}` §6 telephony
/// responses and webhooks) onto our lifecycle. Unrecognized strings map to
/// `failed`/`network-error` rather than panicking -- the provider surface is
/// out of our control.
pub fn map_provider_status(status: &str) -> StatusMapping {
    match status {
        "queued" => StatusMapping {
            call_status: CallStatus::Initiated,
            sub_status: Some(OutboundSubStatus::Queued),
            failure_reason: None,
        },
        "ringing" => StatusMapping {
            call_status: CallStatus::Ringing,
            sub_status: Some(OutboundSubStatus::Ringing),
            failure_reason: None,
        },
        "in-progress" | "answered" | "connected" => StatusMapping {
            call_status: CallStatus::InProgress,
            sub_status: Some(OutboundSubStatus::Connected),
            failure_reason: None,
        },
        "completed" => StatusMapping {
            call_status: CallStatus::Completed,
            sub_status: Some(OutboundSubStatus::Connected),
            failure_reason: None,
        },
        "voicemail" => StatusMapping {
            call_status: CallStatus::Completed,
            sub_status: Some(OutboundSubStatus::Voicemail),
            failure_reason: Some(FailureReason::Voicemail),
        },
        "no-answer" => StatusMapping {
            call_status: CallStatus::Failed,
            sub_status: Some(OutboundSubStatus::NoAnswer),
            failure_reason: Some(FailureReason::NoAnswer),
        },
        "busy" => StatusMapping {
            call_status: CallStatus::Failed,
            sub_status: Some(OutboundSubStatus::Busy),
            failure_reason: Some(FailureReason::Busy),
        },
        "canceled" | "cancelled" => StatusMapping {
            call_status: CallStatus::Canceled,
            sub_status: None,
            failure_reason: Some(FailureReason::Canceled),
        },
        "failed" => StatusMapping {
            call_status: CallStatus::Failed,
            sub_status: None,
            failure_reason: Some(FailureReason::NetworkError),
        },
        _ => StatusMapping {
            call_status: CallStatus::Failed,
            sub_status: None,
            failure_reason: Some(FailureReason::NetworkError),
        },
    }
}
