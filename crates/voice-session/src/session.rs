//! The per-call session engine (§4.4, C4). A [`Session`] owns exactly one
//! media socket and runs as a single task; background generation work is
//! spawned but only ever reports back through [`EngineEvent`] so that all
//! mutation of session state happens on one task (§4.4 "single-writer-per-
//! session concurrency discipline").

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use voice_pool::{SttConnector, SttEvent, SttOptions, SttPool, SttSlot, TtsQueue};
use voice_types::{Agent, Call, CallStatus, FailureReason, Speaker, TranscriptTurn};

use crate::error::{Result, SessionError};
use crate::events::{SessionEvent, SessionEventKind, UtteranceTimings};
use crate::knowledge_base::KnowledgeBase;
use crate::llm::{ChatMessage, LlmClient};
use crate::media::{chunk_pcm, OutboundMediaFrame};
use crate::state::SessionState;
use crate::tts_client::TtsSynthesizer;

const SENTENCE_TERMINATORS: [char; 3] = ['.', '?', '!'];

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub speculation_word_threshold: u32,
    pub silence_backstop: Duration,
    pub max_call_duration: Duration,
    pub max_idle: Duration,
    pub tts_provider: String,
    pub tts_fallback_provider: Option<String>,
    pub silence_check_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speculation_word_threshold: 3,
            silence_backstop: Duration::from_millis(1_000),
            max_call_duration: Duration::from_secs(30 * 60),
            max_idle: Duration::from_secs(30),
            tts_provider: "provider-a".to_string(),
            tts_fallback_provider: None,
            silence_check_interval: Duration::from_millis(200),
        }
    }
}

/// Where the session writes outbound audio. Implemented by `voice-server`
/// over the real WebSocket; tests use an in-memory channel.
#[async_trait::async_trait]
pub trait MediaSink: Send {
    async fn send_frame(&mut self, frame: OutboundMediaFrame) -> std::result::Result<(), String>;
}

pub struct SessionSummary {
    pub call: Call,
    pub events: Vec<SessionEvent>,
    pub transcript: Vec<TranscriptTurn>,
    pub timings: Vec<UtteranceTimings>,
}

/// Messages a spawned generation task reports back to the owning session's
/// run loop; the task never touches `Session` fields directly.
enum EngineEvent {
    FirstToken,
    Sentence(String),
    AudioChunk(Vec<u8>),
    FirstAudioChunk,
    EndPhraseInResponse,
    Complete { full_text: String },
    LlmFailed(String),
    TtsFailed { fell_back: bool },
}

struct UtteranceState {
    partial_word_count: u32,
    speculating: bool,
    spec_cancel: Option<CancellationToken>,
    last_activity: Instant,
    started_at: Instant,
    timings: UtteranceTimings,
    /// Set when the user's final transcript matched an end phrase while a
    /// speculative response was still streaming; consumed once that
    /// response completes (§4.4.4 tie-break).
    pending_end_phrase_from_user: bool,
}

impl UtteranceState {
    fn fresh(now: Instant) -> Self {
        Self {
            partial_word_count: 0,
            speculating: false,
            spec_cancel: None,
            last_activity: now,
            started_at: now,
            timings: UtteranceTimings::default(),
            pending_end_phrase_from_user: false,
        }
    }
}

pub struct Session<C: SttConnector + 'static> {
    call: Call,
    agent: Agent,
    config: SessionConfig,
    stream_sid: String,
    stt_pool: Arc<SttPool<C>>,
    tts_queue: Arc<TtsQueue>,
    tts: Arc<dyn TtsSynthesizer>,
    llm: Arc<dyn LlmClient>,
    kb: Option<Arc<dyn KnowledgeBase>>,
    media: Box<dyn MediaSink>,
    audio_rx: mpsc::Receiver<Vec<u8>>,
    hangup: CancellationToken,

    state: SessionState,
    seq: u64,
    events: Vec<SessionEvent>,
    transcript: Vec<TranscriptTurn>,
    timings: Vec<UtteranceTimings>,
    conversation: Vec<ChatMessage>,
    utterance: UtteranceState,
    greeting_cache: Option<(String, Vec<u8>)>,
}

impl<C: SttConnector + 'static> Session<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call: Call,
        agent: Agent,
        config: SessionConfig,
        stream_sid: String,
        stt_pool: Arc<SttPool<C>>,
        tts_queue: Arc<TtsQueue>,
        tts: Arc<dyn TtsSynthesizer>,
        llm: Arc<dyn LlmClient>,
        kb: Option<Arc<dyn KnowledgeBase>>,
        media: Box<dyn MediaSink>,
        audio_rx: mpsc::Receiver<Vec<u8>>,
        hangup: CancellationToken,
    ) -> Self {
        let system_prompt = agent.persona_prompt.clone();
        Self {
            call,
            agent,
            config,
            stream_sid,
            stt_pool,
            tts_queue,
            tts,
            llm,
            kb,
            media,
            audio_rx,
            hangup,
            state: SessionState::Opening,
            seq: 0,
            events: Vec::new(),
            transcript: Vec::new(),
            timings: Vec::new(),
            conversation: vec![ChatMessage::system(system_prompt)],
            utterance: UtteranceState::fresh(Instant::now()),
            greeting_cache: None,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        self.events.push(SessionEvent::new(SessionEventKind::StateChanged {
            from: self.state,
            to: next,
        }));
        self.state = next;
    }

    /// Drive the session to completion: acquire resources, speak the
    /// greeting, process the call, and tear down (§4.4.1).
    #[instrument(skip(self), fields(call_id = %self.call.id))]
    pub async fn run(mut self) -> SessionSummary {
        let deadline = tokio::time::Instant::now() + self.config.max_call_duration;

        let options = SttOptions {
            language: self.agent.language.clone(),
            endpointing_ms: self.config.silence_backstop.as_millis() as u32,
            vad_enabled: true,
            model: None,
        };

        let mut slot = match self.stt_pool.acquire(self.call.id.to_string(), options).await {
            Ok(slot) => slot,
            Err(err) => {
                warn!(error = %err, "failed to acquire STT slot; ending session before it starts");
                return self.end(CallStatus::Failed, Some(FailureReason::ConnectionLost)).await;
            }
        };

        self.transition(SessionState::Greeting);
        if let Err(err) = self.speak_greeting().await {
            warn!(error = %err, "failed to deliver greeting");
        }
        self.transition(SessionState::Listening);

        let (engine_tx, mut engine_rx) = mpsc::channel::<EngineEvent>(64);

        loop {
            if self.state == SessionState::Closed {
                break;
            }
            tokio::select! {
                biased;

                _ = self.hangup.cancelled() => {
                    info!("explicit hangup");
                    slot.release().await;
                    return self.end(CallStatus::Completed, None).await;
                }

                _ = tokio::time::sleep_until(deadline) => {
                    info!("max call duration reached");
                    slot.release().await;
                    return self.end(CallStatus::Completed, None).await;
                }

                maybe_audio = self.audio_rx.recv() => {
                    match maybe_audio {
                        Some(frame) => {
                            self.utterance.last_activity = Instant::now();
                            if let Err(err) = slot.send_audio(&frame).await {
                                warn!(error = %err, "failed forwarding inbound audio to STT");
                            }
                        }
                        None => {
                            info!("media socket closed by provider");
                            slot.release().await;
                            return self.end(CallStatus::Completed, None).await;
                        }
                    }
                }

                event = slot.next_event() => {
                    match event {
                        Some(event) => {
                            if let Some(outcome) = self
                                .handle_stt_event(event, &mut slot, &engine_tx)
                                .await
                            {
                                slot.release().await;
                                return self.end(outcome.0, outcome.1).await;
                            }
                        }
                        None => {
                            warn!("STT stream ended unexpectedly");
                            if !self.try_reacquire(&mut slot).await {
                                slot.release().await;
                                return self.end(CallStatus::Failed, Some(FailureReason::ConnectionLost)).await;
                            }
                        }
                    }
                }

                Some(msg) = engine_rx.recv() => {
                    if let Some(outcome) = self.handle_engine_event(msg).await {
                        slot.release().await;
                        return self.end(outcome.0, outcome.1).await;
                    }
                }

                _ = sleep(self.config.silence_check_interval) => {
                    if self.utterance.last_activity.elapsed() >= self.config.max_idle {
                        info!("no audio activity within max idle window");
                        slot.release().await;
                        return self.end(CallStatus::Failed, Some(FailureReason::NoResponse)).await;
                    }
                }
            }
        }

        self.end(CallStatus::Completed, None).await
    }

    async fn speak_greeting(&mut self) -> Result<()> {
        let text = self.agent.greeting_text().to_string();
        let pcm = self.synthesize_now(&text).await.map_err(|e| {
            SessionError::MediaSinkClosed(format!("greeting synthesis failed: {e}"))
        })?;
        self.transcript
            .push(TranscriptTurn::new(self.call.id, Speaker::Assistant, &text));
        self.conversation.push(ChatMessage::assistant(text));
        self.dispatch_audio(&pcm).await
    }

    async fn synthesize_now(&self, text: &str) -> std::result::Result<Vec<u8>, String> {
        let tts = self.tts.clone();
        let voice_id = self.agent.voice.voice_id.clone();
        let model = self.agent.llm.model.clone();
        let text = text.to_string();
        self.tts_queue
            .synthesize(&self.config.tts_provider, move || async move {
                tts.synthesize(&voice_id, Some(&model), &text).await
            })
            .await
    }

    async fn dispatch_audio(&mut self, pcm: &[u8]) -> Result<()> {
        for chunk in chunk_pcm(pcm) {
            self.seq += 1;
            let frame = OutboundMediaFrame::new(self.stream_sid.clone(), self.seq, &chunk);
            self.media
                .send_frame(frame)
                .await
                .map_err(SessionError::MediaSinkClosed)?;
            self.utterance.timings.audio_bytes_sent += chunk.len() as u64;
        }
        Ok(())
    }

    /// Returns `Some((status, reason))` when the session should end.
    async fn handle_stt_event(
        &mut self,
        event: SttEvent,
        slot: &mut SttSlot<C>,
        engine_tx: &mpsc::Sender<EngineEvent>,
    ) -> Option<(CallStatus, Option<FailureReason>)> {
        self.utterance.last_activity = Instant::now();
        match event {
            SttEvent::Partial { text } => {
                if self.utterance.timings.time_to_first_partial.is_none() {
                    self.utterance.timings.time_to_first_partial =
                        Some(self.utterance.started_at.elapsed());
                }
                let word_count = text.split_whitespace().count() as u32;
                self.utterance.partial_word_count = word_count;
                if !self.utterance.speculating
                    && word_count >= self.config.speculation_word_threshold
                {
                    self.start_speculative(text, engine_tx.clone());
                }
                None
            }
            SttEvent::UtteranceEnd => {
                // Handled definitively on the Final event; utterance-end
                // alone (without a final transcript) is a no-op here
                // besides refreshing the activity clock above.
                None
            }
            SttEvent::Final { text } => self.handle_final_transcript(text, engine_tx.clone()).await,
            SttEvent::SpeechStarted => None,
            SttEvent::Error { message } => {
                warn!(error = %message, "STT upstream error mid-call");
                self.events.push(SessionEvent::new(SessionEventKind::SttError {
                    message: message.clone(),
                    reacquired: false,
                }));
                if self.try_reacquire(slot).await {
                    None
                } else {
                    Some((CallStatus::Failed, Some(FailureReason::ConnectionLost)))
                }
            }
        }
    }

    async fn try_reacquire(&mut self, slot: &mut SttSlot<C>) -> bool {
        // One immediate reacquire attempt (§4.4.8). The existing slot is
        // released first so its capacity is freed before we ask for a new
        // one.
        let client_id = slot.client_id().to_string();
        let options = SttOptions {
            language: self.agent.language.clone(),
            endpointing_ms: self.config.silence_backstop.as_millis() as u32,
            vad_enabled: true,
            model: None,
        };
        match self.stt_pool.acquire(client_id, options).await {
            Ok(new_slot) => {
                *slot = new_slot;
                self.events.push(SessionEvent::new(SessionEventKind::SttError {
                    message: "reacquired after upstream error".to_string(),
                    reacquired: true,
                }));
                true
            }
            Err(err) => {
                warn!(error = %err, "STT reacquire failed");
                false
            }
        }
    }

    fn start_speculative(&mut self, partial_text: String, engine_tx: mpsc::Sender<EngineEvent>) {
        self.utterance.speculating = true;
        self.transition(SessionState::Listening);
        self.utterance.timings.speculative_trigger_offset =
            Some(self.utterance.started_at.elapsed());
        self.events.push(SessionEvent::new(SessionEventKind::SpeculationStarted {
            partial_word_count: self.utterance.partial_word_count,
        }));

        let cancel = CancellationToken::new();
        self.utterance.spec_cancel = Some(cancel.clone());

        let mut messages = self.conversation.clone();
        messages.push(ChatMessage::user(partial_text));

        spawn_generation(
            self.llm.clone(),
            self.tts.clone(),
            self.tts_queue.clone(),
            self.config.tts_provider.clone(),
            self.config.tts_fallback_provider.clone(),
            self.agent.llm.model.clone(),
            self.agent.voice.voice_id.clone(),
            self.agent.end_phrases.clone(),
            messages,
            cancel,
            engine_tx,
        );
    }

    async fn handle_final_transcript(
        &mut self,
        text: String,
        engine_tx: mpsc::Sender<EngineEvent>,
    ) -> Option<(CallStatus, Option<FailureReason>)> {
        self.transcript
            .push(TranscriptTurn::new(self.call.id, Speaker::User, &text));
        self.conversation.push(ChatMessage::user(text.clone()));

        let end_phrase_matched = self.agent.matches_end_phrase(&text);
        if end_phrase_matched {
            self.events.push(SessionEvent::new(SessionEventKind::EndPhraseMatched {
                phrase: text.clone(),
            }));
        }

        if self.state == SessionState::Listening {
            self.transition(SessionState::Speaking);
        }

        if self.utterance.speculating {
            // The speculative response is already authoritative; it keeps
            // streaming via `engine_tx` and we do not re-run the LLM
            // (§4.4.4). If the user's final transcript matched an end
            // phrase we still let the in-flight response finish — abort is
            // reserved for hangup, socket close, or an end phrase detected
            // in the assistant's own text.
            if end_phrase_matched {
                // Nothing further to do here; `ending` is triggered once
                // the in-flight generation completes, in
                // `handle_engine_event`.
            }
            self.utterance.pending_end_phrase_from_user = end_phrase_matched;
            return None;
        }

        if end_phrase_matched {
            return self.speak_goodbye_and_end().await;
        }

        // Non-speculative path: run the LLM normally, optionally with RAG.
        let mut messages = self.conversation.clone();
        if let Some(kb) = self.kb.clone() {
            if let Some(kb_id) = self.agent.knowledge_base_id.clone() {
                if kb.is_relevant(&text).await {
                    let results = kb.query(&kb_id, &text).await;
                    if !results.is_empty() {
                        let context = results
                            .iter()
                            .map(|r| format!("- {} (source: {})", r.text, r.source))
                            .collect::<Vec<_>>()
                            .join("\n");
                        messages.push(ChatMessage::system(format!(
                            "Relevant knowledge base context:\n{context}"
                        )));
                    }
                }
            }
        }

        let cancel = CancellationToken::new();
        self.utterance.spec_cancel = Some(cancel.clone());
        spawn_generation(
            self.llm.clone(),
            self.tts.clone(),
            self.tts_queue.clone(),
            self.config.tts_provider.clone(),
            self.config.tts_fallback_provider.clone(),
            self.agent.llm.model.clone(),
            self.agent.voice.voice_id.clone(),
            self.agent.end_phrases.clone(),
            messages,
            cancel,
            engine_tx,
        );
        None
    }

    async fn speak_goodbye_and_end(&mut self) -> Option<(CallStatus, Option<FailureReason>)> {
        let text = self.agent.goodbye_text().to_string();
        if self.state == SessionState::Listening {
            self.transition(SessionState::Speaking);
        }
        match self.synthesize_now(&text).await {
            Ok(pcm) => {
                self.transcript
                    .push(TranscriptTurn::new(self.call.id, Speaker::Assistant, &text));
                let _ = self.dispatch_audio(&pcm).await;
            }
            Err(err) => warn!(error = %err, "failed to synthesise goodbye line"),
        }
        self.transition(SessionState::Ending);
        Some((CallStatus::Completed, None))
    }

    /// Returns `Some((status, reason))` when the session should end.
    async fn handle_engine_event(
        &mut self,
        msg: EngineEvent,
    ) -> Option<(CallStatus, Option<FailureReason>)> {
        match msg {
            EngineEvent::FirstToken => {
                self.utterance.timings.llm_time_to_first_token =
                    Some(self.utterance.started_at.elapsed());
                None
            }
            EngineEvent::Sentence(_) => None,
            EngineEvent::AudioChunk(chunk) => {
                if self.utterance.timings.total_time_to_first_audio.is_none() {
                    self.utterance.timings.total_time_to_first_audio =
                        Some(self.utterance.started_at.elapsed());
                }
                if let Err(err) = self.dispatch_audio(&chunk).await {
                    warn!(error = %err, "failed dispatching speculative audio chunk");
                }
                None
            }
            EngineEvent::FirstAudioChunk => {
                self.utterance.timings.tts_time_to_first_chunk =
                    Some(self.utterance.started_at.elapsed());
                None
            }
            EngineEvent::EndPhraseInResponse => {
                self.events.push(SessionEvent::new(SessionEventKind::EndPhraseMatched {
                    phrase: "<assistant response>".to_string(),
                }));
                None
            }
            EngineEvent::Complete { full_text } => {
                self.transcript.push(TranscriptTurn::new(
                    self.call.id,
                    Speaker::Assistant,
                    &full_text,
                ));
                self.conversation.push(ChatMessage::assistant(full_text));
                self.utterance.timings.utterance_duration =
                    Some(self.utterance.started_at.elapsed());
                self.timings.push(std::mem::take(&mut self.utterance.timings));
                let pending_end = self.utterance.pending_end_phrase_from_user;
                self.utterance = UtteranceState::fresh(Instant::now());

                if pending_end {
                    self.transition(SessionState::Ending);
                    return Some((CallStatus::Completed, None));
                }
                if self.state == SessionState::Speaking {
                    self.transition(SessionState::Listening);
                }
                None
            }
            EngineEvent::LlmFailed(message) => {
                warn!(error = %message, "LLM error; speaking fallback utterance");
                self.events
                    .push(SessionEvent::new(SessionEventKind::LlmError { message }));
                let fallback = "I'm sorry, I didn't quite catch that. Could you say that again?";
                if let Ok(pcm) = self.synthesize_now(fallback).await {
                    let _ = self.dispatch_audio(&pcm).await;
                }
                self.utterance = UtteranceState::fresh(Instant::now());
                if self.state == SessionState::Speaking {
                    self.transition(SessionState::Listening);
                }
                None
            }
            EngineEvent::TtsFailed { fell_back } => {
                self.events.push(SessionEvent::new(SessionEventKind::TtsError {
                    message: "synthesis failed".to_string(),
                    fell_back,
                }));
                if !fell_back {
                    debug!("both primary and fallback TTS failed; skipping this turn");
                }
                if self.state == SessionState::Speaking {
                    self.transition(SessionState::Listening);
                }
                None
            }
        }
    }

    async fn end(
        mut self,
        status: CallStatus,
        reason: Option<FailureReason>,
    ) -> SessionSummary {
        if self.state != SessionState::Ending {
            self.transition(SessionState::Ending);
        }
        if let Some(cancel) = self.utterance.spec_cancel.take() {
            cancel.cancel();
        }
        self.call.finalize(status, reason, chrono::Utc::now());
        self.transition(SessionState::Closed);
        info!(status = ?self.call.status, "session closed");
        SessionSummary {
            call: self.call,
            events: self.events,
            transcript: self.transcript,
            timings: self.timings,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_generation(
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn TtsSynthesizer>,
    tts_queue: Arc<TtsQueue>,
    provider: String,
    fallback_provider: Option<String>,
    model: String,
    voice_id: String,
    end_phrases: Vec<String>,
    messages: Vec<ChatMessage>,
    cancel: CancellationToken,
    engine_tx: mpsc::Sender<EngineEvent>,
) {
    tokio::spawn(async move {
        let mut stream = match llm.stream_chat(&model, messages, cancel.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = engine_tx.send(EngineEvent::LlmFailed(err)).await;
                return;
            }
        };

        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut first_token_sent = false;
        let mut stop_after_current_sentence = false;

        loop {
            if cancel.is_cancelled() {
                return;
            }
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = stream.next_chunk() => chunk,
            };
            let Some(chunk) = chunk else { break };
            if !first_token_sent {
                first_token_sent = true;
                let _ = engine_tx.send(EngineEvent::FirstToken).await;
            }
            buffer.push_str(&chunk);
            full_text.push_str(&chunk);

            while let Some(idx) = buffer.find(SENTENCE_TERMINATORS) {
                let sentence: String = buffer.drain(..=idx).collect();
                let sentence = sentence.trim().to_string();
                if sentence.is_empty() {
                    continue;
                }
                let _ = engine_tx.send(EngineEvent::Sentence(sentence.clone())).await;

                let matched_end_phrase = end_phrases
                    .iter()
                    .any(|p| sentence.to_lowercase().contains(&p.to_lowercase()));
                if matched_end_phrase {
                    stop_after_current_sentence = true;
                    let _ = engine_tx.send(EngineEvent::EndPhraseInResponse).await;
                }

                if let Err(failed) = synthesize_and_send(
                    &tts,
                    &tts_queue,
                    &provider,
                    fallback_provider.as_deref(),
                    &voice_id,
                    &model,
                    &sentence,
                    &engine_tx,
                )
                .await
                {
                    let _ = engine_tx.send(EngineEvent::TtsFailed { fell_back: failed }).await;
                }

                if stop_after_current_sentence {
                    break;
                }
            }
            if stop_after_current_sentence {
                break;
            }
        }

        let trailing = buffer.trim().to_string();
        if !stop_after_current_sentence && !trailing.is_empty() {
            let _ = synthesize_and_send(
                &tts,
                &tts_queue,
                &provider,
                fallback_provider.as_deref(),
                &voice_id,
                &model,
                &trailing,
                &engine_tx,
            )
            .await;
        }

        let _ = engine_tx.send(EngineEvent::Complete { full_text }).await;
    });
}

/// Returns `Ok(())` on success, `Err(fell_back)` when synthesis ultimately
/// failed (§4.4.8 "TTS error"): try the fallback provider once, then give
/// up on this sentence.
async fn synthesize_and_send(
    tts: &Arc<dyn TtsSynthesizer>,
    tts_queue: &Arc<TtsQueue>,
    provider: &str,
    fallback_provider: Option<&str>,
    voice_id: &str,
    model: &str,
    sentence: &str,
    engine_tx: &mpsc::Sender<EngineEvent>,
) -> std::result::Result<(), bool> {
    let synth = |provider: String| {
        let tts = tts.clone();
        let voice_id = voice_id.to_string();
        let model = model.to_string();
        let sentence = sentence.to_string();
        async move { tts.synthesize(&voice_id, Some(&model), &sentence).await }
    };

    let result = tts_queue.synthesize(provider, || synth(provider.to_string())).await;
    let pcm = match result {
        Ok(pcm) => pcm,
        Err(_) => match fallback_provider {
            Some(fb) => match tts_queue.synthesize(fb, || synth(fb.to_string())).await {
                Ok(pcm) => pcm,
                Err(_) => return Err(true),
            },
            None => return Err(false),
        },
    };

    let mut first = true;
    for chunk in chunk_pcm(&pcm) {
        if first {
            let _ = engine_tx.send(EngineEvent::FirstAudioChunk).await;
            first = false;
        }
        if engine_tx.send(EngineEvent::AudioChunk(chunk)).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::Value;
    use voice_pool::SttPoolConfig;
    use voice_types::{LlmSelection, PhoneNumber, VoiceSelection};

    struct FakeSttStream {
        rx: mpsc::UnboundedReceiver<SttEvent>,
    }

    #[async_trait]
    impl voice_pool::SttStream for FakeSttStream {
        async fn send_audio(&mut self, _frame: &[u8]) -> std::result::Result<(), String> {
            Ok(())
        }
        async fn next_event(&mut self) -> Option<SttEvent> {
            self.rx.recv().await
        }
        async fn close(&mut self) {}
    }

    struct FakeSttConnector {
        events_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<SttEvent>>>>,
    }

    #[async_trait]
    impl voice_pool::SttConnector for FakeSttConnector {
        async fn connect(
            &self,
            _client_id: &str,
            _options: &SttOptions,
        ) -> std::result::Result<Box<dyn voice_pool::SttStream>, String> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events_tx.lock().unwrap() = Some(tx);
            Ok(Box::new(FakeSttStream { rx }))
        }
    }

    struct FakeLlmStream {
        chunks: std::vec::IntoIter<String>,
    }

    #[async_trait]
    impl crate::llm::LlmStream for FakeLlmStream {
        async fn next_chunk(&mut self) -> Option<String> {
            self.chunks.next()
        }
    }

    struct FakeLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn stream_chat(
            &self,
            _model: &str,
            _messages: Vec<ChatMessage>,
            _cancel: CancellationToken,
        ) -> std::result::Result<Box<dyn crate::llm::LlmStream>, String> {
            let chunks: Vec<String> = self.reply.split_inclusive(['.', '?', '!']).map(|s| s.to_string()).collect();
            Ok(Box::new(FakeLlmStream { chunks: chunks.into_iter() }))
        }
    }

    struct FakeTts;

    #[async_trait]
    impl TtsSynthesizer for FakeTts {
        async fn synthesize(
            &self,
            _voice_id: &str,
            _model: Option<&str>,
            text: &str,
        ) -> std::result::Result<Vec<u8>, String> {
            Ok(vec![1u8; text.len().max(1)])
        }
    }

    struct FakeMediaSink {
        frames: Arc<StdMutex<Vec<OutboundMediaFrame>>>,
    }

    #[async_trait]
    impl MediaSink for FakeMediaSink {
        async fn send_frame(&mut self, frame: OutboundMediaFrame) -> std::result::Result<(), String> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn agent(end_phrases: Vec<String>) -> Agent {
        Agent {
            id: "agent-1".into(),
            active: true,
            persona_prompt: "You are Sam, a helpful assistant.".into(),
            greeting: Some("Hi, this is Sam.".into()),
            end_phrases,
            goodbye_line: Some("Bye now!".into()),
            voice: VoiceSelection {
                provider: "provider-a".into(),
                voice_id: "sam".into(),
            },
            llm: LlmSelection {
                provider: "openai".into(),
                model: "gpt-4o".into(),
            },
            language: "en-US".into(),
            knowledge_base_id: None,
        }
    }

    fn call() -> Call {
        Call::new_outbound(
            PhoneNumber::parse("+14155552671").unwrap(),
            "agent-1".into(),
            None,
            chrono::Utc::now(),
            Value::Null,
        )
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            speculation_word_threshold: 3,
            silence_backstop: Duration::from_millis(200),
            max_call_duration: Duration::from_secs(5),
            max_idle: Duration::from_secs(2),
            tts_provider: "provider-a".into(),
            tts_fallback_provider: None,
            silence_check_interval: Duration::from_millis(20),
        }
    }

    #[allow(clippy::type_complexity)]
    fn build_session(
        reply: &str,
        end_phrases: Vec<String>,
    ) -> (
        Session<FakeSttConnector>,
        Arc<StdMutex<Vec<OutboundMediaFrame>>>,
        Arc<StdMutex<Option<mpsc::UnboundedSender<SttEvent>>>>,
        mpsc::Sender<Vec<u8>>,
        CancellationToken,
    ) {
        let events_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<SttEvent>>>> =
            Arc::new(StdMutex::new(None));
        let connector = FakeSttConnector {
            events_tx: events_tx.clone(),
        };
        let stt_pool = SttPool::new(connector, SttPoolConfig::default());
        let tts_queue = TtsQueue::new(std::collections::HashMap::new());
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let media = Box::new(FakeMediaSink { frames: frames.clone() });
        let (audio_tx, audio_rx) = mpsc::channel(8);
        let hangup = CancellationToken::new();

        let session = Session::new(
            call(),
            agent(end_phrases),
            test_config(),
            "stream-1".into(),
            stt_pool,
            tts_queue,
            Arc::new(FakeTts),
            Arc::new(FakeLlm { reply: reply.to_string() }),
            None,
            media,
            audio_rx,
            hangup.clone(),
        );
        (session, frames, events_tx, audio_tx, hangup)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn greets_then_answers_and_hangs_up() {
        let (session, frames, _events_tx, _audio_tx, hangup) =
            build_session("Sure, I can help with that.", vec!["goodbye".into()]);

        let handle = tokio::spawn(session.run());

        // Let the greeting synthesize and dispatch before hanging up.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!frames.lock().unwrap().is_empty(), "greeting should have produced audio frames");

        hangup.cancel();
        let summary = handle.await.unwrap();
        assert_eq!(summary.call.status, CallStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn final_transcript_drives_a_spoken_response() {
        let (session, frames, events_tx, _audio_tx, _hangup) =
            build_session("Sure, I can help with that.", vec![]);

        let handle = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let before = frames.lock().unwrap().len();

        let tx = events_tx
            .lock()
            .unwrap()
            .clone()
            .expect("connector should have stored a sender by now");
        tx.send(SttEvent::Final {
            text: "What are your hours?".to_string(),
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(
            frames.lock().unwrap().len() > before,
            "the assistant's response should have produced additional audio frames"
        );

        drop(tx);
        let summary = tokio::time::timeout(Duration::from_secs(3), handle).await;
        // The session either hit max idle or max call duration; either way
        // it must have recorded the user's transcript.
        if let Ok(Ok(summary)) = summary {
            assert!(summary
                .transcript
                .iter()
                .any(|t| t.text.contains("hours")));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_timeout_fails_the_call() {
        let (session, _frames, _events_tx, _audio_tx, _hangup) =
            build_session("hello", vec![]);
        let summary = session.run().await;
        assert_eq!(summary.call.status, CallStatus::Failed);
        assert_eq!(summary.call.failure_reason, Some(FailureReason::NoResponse));
    }
}
