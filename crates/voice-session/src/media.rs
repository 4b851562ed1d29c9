//! Media socket wire format (§6 "Media socket"): newline-delimited JSON
//! frames, `media.payload` base64-encoded 8 kHz 16-bit PCM little-endian
//! mono.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// A frame received from the provider over the media socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMediaFrame {
    Connected,
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(rename = "callSid")]
        call_sid: String,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
    Mark {
        mark: MarkPayload,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

impl InboundMediaFrame {
    /// Parse one newline-delimited JSON frame.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Decode the raw PCM payload of a `media` frame, if this is one.
    pub fn decode_audio(&self) -> Option<Vec<u8>> {
        match self {
            InboundMediaFrame::Media { media } => {
                base64::engine::general_purpose::STANDARD.decode(&media.payload).ok()
            }
            _ => None,
        }
    }
}

/// One outbound audio frame the session hands to the provider socket,
/// carrying a monotonically increasing sequence number per session
/// (§4.4.5).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub struct OutboundMediaFrame {
    pub event: &'static str,
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    pub media: OutboundMediaPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMediaPayload {
    pub payload: String,
    pub seq: u64,
}

impl OutboundMediaFrame {
    pub fn new(stream_sid: impl Into<String>, seq: u64, pcm: &[u8]) -> Self {
        Self {
            event: "media",
            stream_sid: stream_sid.into(),
            media: OutboundMediaPayload {
                payload: base64::engine::general_purpose::STANDARD.encode(pcm),
                seq,
            },
        }
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).expect("OutboundMediaFrame is always serialisable")
    }
}

/// Fixed payload size audio is framed into before dispatch (§4.4.5). 320
/// bytes matches a typical 20 ms frame of 8 kHz 16-bit mono PCM.
pub const FRAME_SIZE_BYTES: usize = 320;

/// Split `pcm` into `FRAME_SIZE_BYTES`-sized chunks, padding the final
/// partial chunk with silence (zero) samples so every frame the provider
/// receives is uniform size.
pub fn chunk_pcm(pcm: &[u8]) -> Vec<Vec<u8>> {
    if pcm.is_empty() {
        return Vec::new();
    }
    pcm.chunks(FRAME_SIZE_BYTES)
        .map(|chunk| {
            if chunk.len() == FRAME_SIZE_BYTES {
                chunk.to_vec()
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(FRAME_SIZE_BYTES, 0);
                padded
            }
        })
        .collect()
}
