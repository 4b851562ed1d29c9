//! Structured per-call lifecycle log (SPEC_FULL §G.2), separate from the
//! free-form transcript. Attached to a [`crate::session::Session`] for the
//! duration of the call and summarised into [`crate::session::SessionSummary`]
//! on close; never persisted beyond the call's metadata blob.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::state::SessionState;

#[derive(Debug, Clone)]
pub enum SessionEventKind {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    SpeculationStarted {
        partial_word_count: u32,
    },
    SpeculationDiscarded,
    SttError {
        message: String,
        reacquired: bool,
    },
    LlmError {
        message: String,
    },
    TtsError {
        message: String,
        fell_back: bool,
    },
    EndPhraseMatched {
        phrase: String,
    },
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            at: Utc::now(),
            kind,
        }
    }
}

/// Per-utterance timing facts recorded for §4.4.7 and emitted on session
/// close.
#[derive(Debug, Clone, Default)]
pub struct UtteranceTimings {
    pub time_to_first_partial: Option<Duration>,
    pub time_to_final: Option<Duration>,
    pub speculative_trigger_offset: Option<Duration>,
    pub llm_time_to_first_token: Option<Duration>,
    pub tts_time_to_first_chunk: Option<Duration>,
    pub total_time_to_first_audio: Option<Duration>,
    pub utterance_duration: Option<Duration>,
    pub audio_bytes_sent: u64,
}
