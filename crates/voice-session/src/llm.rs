//! LLM abstraction (§6 "LLM"): streaming chat completion with cancellation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// An in-progress chat completion. Dropping the stream (or cancelling the
/// token passed to [`LlmClient::stream_chat`]) must stop upstream token
/// generation promptly.
#[async_trait]
pub trait LlmStream: Send {
    /// Returns the next incremental token chunk, or `None` once the
    /// response is complete.
    async fn next_chunk(&mut self) -> Option<String>;
}

/// Factory for streaming chat completions (§6 "LLM").
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn stream_chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn LlmStream>, String>;
}
