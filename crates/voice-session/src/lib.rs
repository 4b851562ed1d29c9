//! Per-call session engine (§4.4, C4): the live STT/LLM/TTS orchestration
//! with speculative early-LLM invocation.

pub mod error;
pub mod events;
pub mod knowledge_base;
pub mod llm;
pub mod media;
pub mod session;
pub mod state;
pub mod tts_client;

pub use error::{Result, SessionError};
pub use events::{SessionEvent, SessionEventKind, UtteranceTimings};
pub use knowledge_base::{KnowledgeBase, KnowledgeBaseResult};
pub use llm::{ChatMessage, ChatRole, LlmClient, LlmStream};
pub use media::{chunk_pcm, InboundMediaFrame, OutboundMediaFrame, FRAME_SIZE_BYTES};
pub use session::{MediaSink, Session, SessionConfig, SessionSummary};
pub use state::SessionState;
pub use tts_client::TtsSynthesizer;
