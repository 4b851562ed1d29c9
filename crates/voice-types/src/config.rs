//! Process configuration (SPEC_FULL §D).
//!
//! Loaded in layers: struct [`Default`] values, then an optional TOML file,
//! then `VOICE_*` environment variable overrides (highest precedence).

use std::collections::HashMap;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

fn default_stt_pool_size() -> u32 {
    20
}
fn default_stt_queue_timeout_ms() -> u64 {
    30_000
}
fn default_stt_max_queue_len() -> u32 {
    50
}
fn default_max_concurrent_outbound() -> u32 {
    10
}
fn default_spec_threshold() -> u32 {
    3
}
fn default_silence_backstop_ms() -> u64 {
    1_000
}
fn default_max_call_duration_secs() -> u64 {
    30 * 60
}
fn default_max_idle_secs() -> u64 {
    30
}
fn default_transcript_batch_size() -> u32 {
    5
}
fn default_transcript_batch_interval_secs() -> u64 {
    10
}
fn default_drain_window_secs() -> u64 {
    5 * 60
}
fn default_worker_max_attempts() -> u32 {
    3
}
fn default_bulk_min_gap_ms() -> u64 {
    1_000
}
fn default_pool_acquire_timeout_secs() -> u64 {
    30
}

/// Top-level process configuration. Every key from §6 "Environment" has a
/// field here with the default named in the spec body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub provider: ProviderConfig,

    #[serde(default = "default_max_concurrent_outbound")]
    pub max_concurrent_outbound: u32,

    #[serde(default = "default_bulk_min_gap_ms")]
    pub bulk_min_inter_initiation_gap_ms: u64,

    #[serde(default = "default_stt_pool_size")]
    pub stt_pool_size: u32,
    #[serde(default = "default_stt_queue_timeout_ms")]
    pub stt_queue_timeout_ms: u64,
    #[serde(default = "default_stt_max_queue_len")]
    pub stt_max_queue_len: u32,

    /// Per-provider concurrency caps for TTS synthesis (C2).
    #[serde(default = "default_tts_caps")]
    pub tts_provider_caps: HashMap<String, u32>,

    #[serde(default = "default_spec_threshold")]
    pub speculation_word_threshold: u32,
    #[serde(default = "default_silence_backstop_ms")]
    pub silence_backstop_ms: u64,
    #[serde(default = "default_max_call_duration_secs")]
    pub max_call_duration_secs: u64,
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    #[serde(default = "default_pool_acquire_timeout_secs")]
    pub pool_acquire_timeout_secs: u64,

    pub off_peak: OffPeakConfig,

    #[serde(default)]
    pub auto_retry: bool,
    #[serde(default)]
    pub auto_retry_for_retries: bool,

    #[serde(default = "default_transcript_batch_size")]
    pub transcript_batch_size: u32,
    #[serde(default = "default_transcript_batch_interval_secs")]
    pub transcript_batch_interval_secs: u64,

    #[serde(default = "default_drain_window_secs")]
    pub drain_window_secs: u64,
    #[serde(default = "default_worker_max_attempts")]
    pub worker_max_attempts: u32,
}

fn default_tts_caps() -> HashMap<String, u32> {
    let mut m = HashMap::new();
    m.insert("provider-a".to_string(), 10);
    m.insert("provider-b".to_string(), 100);
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key_id: String,
    pub api_key_secret: String,
    pub virtual_number: String,
    pub app_id: String,
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key_id: String::new(),
            api_key_secret: String::new(),
            virtual_number: String::new(),
            app_id: String::new(),
            base_url: "https://api.telephony.example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffPeakConfig {
    pub enabled: bool,
    pub start: String,
    pub end: String,
    pub timezone: Tz,
    pub allowed_days: Vec<u8>,
}

impl Default for OffPeakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: "10:00".to_string(),
            end: "16:00".to_string(),
            timezone: chrono_tz::UTC,
            allowed_days: vec![1, 2, 3, 4, 5],
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            max_concurrent_outbound: default_max_concurrent_outbound(),
            bulk_min_inter_initiation_gap_ms: default_bulk_min_gap_ms(),
            stt_pool_size: default_stt_pool_size(),
            stt_queue_timeout_ms: default_stt_queue_timeout_ms(),
            stt_max_queue_len: default_stt_max_queue_len(),
            tts_provider_caps: default_tts_caps(),
            speculation_word_threshold: default_spec_threshold(),
            silence_backstop_ms: default_silence_backstop_ms(),
            max_call_duration_secs: default_max_call_duration_secs(),
            max_idle_secs: default_max_idle_secs(),
            pool_acquire_timeout_secs: default_pool_acquire_timeout_secs(),
            off_peak: OffPeakConfig::default(),
            auto_retry: true,
            auto_retry_for_retries: false,
            transcript_batch_size: default_transcript_batch_size(),
            transcript_batch_interval_secs: default_transcript_batch_interval_secs(),
            drain_window_secs: default_drain_window_secs(),
            worker_max_attempts: default_worker_max_attempts(),
        }
    }
}

impl PlatformConfig {
    pub fn stt_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.stt_queue_timeout_ms)
    }

    pub fn silence_backstop(&self) -> Duration {
        Duration::from_millis(self.silence_backstop_ms)
    }

    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_duration_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    /// Load defaults, then overlay a TOML file if present, then overlay
    /// `VOICE_*` environment variables. Missing/invalid file paths outside
    /// of `path` being `None` are surfaced as an error; a `None` path is
    /// valid and simply skips that layer.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| ConfigError::Io(p.display().to_string(), e.to_string()))?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => PlatformConfig::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VOICE_PROVIDER_API_KEY_ID") {
            self.provider.api_key_id = v;
        }
        if let Ok(v) = std::env::var("VOICE_PROVIDER_API_KEY_SECRET") {
            self.provider.api_key_secret = v;
        }
        if let Ok(v) = std::env::var("VOICE_PROVIDER_VIRTUAL_NUMBER") {
            self.provider.virtual_number = v;
        }
        if let Ok(v) = std::env::var("VOICE_PROVIDER_APP_ID") {
            self.provider.app_id = v;
        }
        if let Ok(v) = std::env::var("VOICE_PROVIDER_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Ok(v) = std::env::var("VOICE_MAX_CONCURRENT_OUTBOUND") {
            if let Ok(n) = v.parse() {
                self.max_concurrent_outbound = n;
            }
        }
        if let Ok(v) = std::env::var("VOICE_STT_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                self.stt_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("VOICE_AUTO_RETRY") {
            self.auto_retry = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("VOICE_AUTO_RETRY_FOR_RETRIES") {
            self.auto_retry_for_retries = v == "true" || v == "1";
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, String),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}
