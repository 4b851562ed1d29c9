//! Append-only transcript turns (§3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::CallId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub call_id: CallId,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptTurn {
    pub fn new(call_id: CallId, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            call_id,
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}
