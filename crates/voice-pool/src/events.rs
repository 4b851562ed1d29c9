//! Closed sum of streaming-STT event variants (DESIGN NOTES: "duck-typed
//! event objects from upstreams" -> a closed enum routed on variant).

/// One event emitted by a live streaming STT connection.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// An in-progress, not-yet-final transcript for the current utterance.
    Partial { text: String },
    /// The finalised transcript for an utterance.
    Final { text: String },
    /// Upstream endpointing decided the utterance is complete.
    UtteranceEnd,
    /// Upstream detected the caller has started speaking (VAD).
    SpeechStarted,
    /// A non-fatal upstream error; the connection may still be usable.
    Error { message: String },
}

/// Per-acquire options for a streaming STT connection (§4.1).
#[derive(Debug, Clone)]
pub struct SttOptions {
    pub language: String,
    pub endpointing_ms: u32,
    pub vad_enabled: bool,
    pub model: Option<String>,
}
