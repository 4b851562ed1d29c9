//! Agent configuration bundle (GLOSSARY: "Agent").
//!
//! The agent-configuration CRUD itself is out of scope (§1 Non-goals); this
//! type is the read-only snapshot the session engine consults.

use serde::{Deserialize, Serialize};

/// A configuration bundle defining one AI caller's behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub active: bool,
    pub persona_prompt: String,
    /// First-utterance text. Empty/absent falls back to a generic greeting
    /// (§4.4.2).
    pub greeting: Option<String>,
    /// Case-insensitive, whole-word-substring end phrases (§4.4.6).
    pub end_phrases: Vec<String>,
    /// Spoken when the session closes politely on an end-phrase match.
    pub goodbye_line: Option<String>,
    pub voice: VoiceSelection,
    pub llm: LlmSelection,
    /// BCP-47 language tag, e.g. "en-US".
    pub language: String,
    pub knowledge_base_id: Option<String>,
}

impl Agent {
    /// The greeting text to speak, falling back to a generic line when the
    /// configured greeting is null or empty (§4.4.2).
    pub fn greeting_text(&self) -> &str {
        match &self.greeting {
            Some(text) if !text.trim().is_empty() => text,
            _ => "Hello, thanks for taking my call.",
        }
    }

    /// The goodbye line to speak before ending, falling back to a default.
    pub fn goodbye_text(&self) -> &str {
        match &self.goodbye_line {
            Some(text) if !text.trim().is_empty() => text,
            _ => "Thanks for your time, goodbye.",
        }
    }

    /// Whether `transcript` contains any configured end phrase as a
    /// case-insensitive substring (§4.4.6). Substring rather than strict
    /// whole-word matching is intentionally permissive per the source
    /// behaviour; callers that need stricter matching should pre-filter.
    pub fn matches_end_phrase(&self, transcript: &str) -> bool {
        let lowered = transcript.to_lowercase();
        self.end_phrases
            .iter()
            .any(|phrase| lowered.contains(&phrase.to_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSelection {
    pub provider: String,
    pub voice_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSelection {
    pub provider: String,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> Agent {
        Agent {
            id: "agent-1".into(),
            active: true,
            persona_prompt: "You are Sam.".into(),
            greeting: Some("Hi, this is Sam.".into()),
            end_phrases: vec!["goodbye".into(), "bye now".into()],
            goodbye_line: Some("Take care, bye!".into()),
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

    #[test]
    fn greeting_falls_back_when_empty() {
        let mut a = agent();
        a.greeting = Some("   ".into());
        assert_eq!(a.greeting_text(), "Hello, thanks for taking my call.");
    }

    #[test]
    fn greeting_uses_configured_text() {
        assert_eq!(agent().greeting_text(), "Hi, this is Sam.");
    }

    #[test]
    fn end_phrase_matches_case_insensitively() {
        assert!(agent().matches_end_phrase("ok Goodbye then"));
        assert!(!agent().matches_end_phrase("let's talk pricing"));
    }
}
