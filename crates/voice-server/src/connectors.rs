//! Reference STT/LLM/TTS/knowledge-base implementations.
//!
//! §1 Non-goals: "no definition of the STT/LLM/TTS providers' own
//! internals". The session engine only needs something behind each trait to
//! drive a real call end-to-end; these are deterministic stand-ins in the
//! same spirit as the pool crate's own `FakeStream`/`FakeConnector` test
//! doubles, wired up as the process's real components rather than confined
//! to `#[cfg(test)]`. A deployment that needs a genuine vendor integration
//! swaps the relevant trait impl for its own crate.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_pool::{SttConnector, SttEvent, SttOptions, SttStream};
use voice_session::{ChatMessage, KnowledgeBase, KnowledgeBaseResult, LlmClient, LlmStream};
use voice_session::TtsSynthesizer;

/// Connects to nothing; echoes back a canned final transcript once, then
/// goes quiet. Exercises the STT slot lifecycle without a real upstream.
pub struct EchoSttConnector;

#[async_trait]
impl SttConnector for EchoSttConnector {
    async fn connect(
        &self,
        _client_id: &str,
        _options: &SttOptions,
    ) -> Result<Box<dyn SttStream>, String> {
        Ok(Box::new(EchoSttStream { emitted: false }))
    }
}

struct EchoSttStream {
    emitted: bool,
}

#[async_trait]
impl SttStream for EchoSttStream {
    async fn send_audio(&mut self, _frame: &[u8]) -> Result<(), String> {
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SttEvent> {
        if self.emitted {
            // Connection stays open with no further upstream events, same
            // as a real STT socket that has nothing left to say.
            return std::future::pending().await;
        }
        self.emitted = true;
        Some(SttEvent::Final {
            text: "hello".to_string(),
        })
    }

    async fn close(&mut self) {}
}

/// Streams back a single fixed sentence, one word per chunk, honoring
/// cancellation promptly (§4.4 "dropping the stream... must stop upstream
/// token generation"). No real completion model is consulted.
pub struct ReferenceLlmClient {
    reply: String,
}

impl ReferenceLlmClient {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

impl Default for ReferenceLlmClient {
    fn default() -> Self {
        Self::new("Thanks for calling, is there anything else I can help with?")
    }
}

#[async_trait]
impl LlmClient for ReferenceLlmClient {
    async fn stream_chat(
        &self,
        _model: &str,
        _messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn LlmStream>, String> {
        let (tx, rx) = mpsc::channel(16);
        let words: Vec<String> = self.reply.split(' ').map(|w| format!("{w} ")).collect();
        tokio::spawn(async move {
            for word in words {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(40)) => {}
                }
                if tx.send(word).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::new(ChannelLlmStream { rx }))
    }
}

struct ChannelLlmStream {
    rx: mpsc::Receiver<String>,
}

#[async_trait]
impl LlmStream for ChannelLlmStream {
    async fn next_chunk(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Returns silence sized for roughly the sentence length, since the wire
/// format (§6 "Telephony provider") is already fixed at 8 kHz 16-bit PCM
/// mono and no real codec is in scope.
pub struct SilentTtsSynthesizer;

#[async_trait]
impl TtsSynthesizer for SilentTtsSynthesizer {
    async fn synthesize(&self, _voice_id: &str, _model: Option<&str>, text: &str) -> Result<Vec<u8>, String> {
        let samples = (text.len() * 160).max(320);
        Ok(vec![0u8; samples])
    }
}

/// Never relevant, never returns results -- the retrieval pipeline itself
/// is out of scope (§1 Non-goals).
pub struct NullKnowledgeBase;

#[async_trait]
impl KnowledgeBase for NullKnowledgeBase {
    async fn is_relevant(&self, _text: &str) -> bool {
        false
    }

    async fn query(&self, _knowledge_base_id: &str, _text: &str) -> Vec<KnowledgeBaseResult> {
        Vec::new()
    }
}
