//! TTS synthesis abstraction (§6 "TTS"). The provider-specific codec and
//! container format are out of scope (§1 Non-goals); this trait returns
//! audio already transcoded to the provider's wire format (8 kHz 16-bit PCM
//! mono, §6 "Telephony provider").

use async_trait::async_trait;

/// One sentence's worth of synthesised audio, ready to be framed and sent
/// (§4.4.5). Implementations own whatever resampling/transcoding their
/// upstream container format requires.
#[async_trait]
pub trait TtsSynthesizer: Send + Sync {
    async fn synthesize(&self, voice_id: &str, model: Option<&str>, text: &str) -> Result<Vec<u8>, String>;
}
