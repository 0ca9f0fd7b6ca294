//! Session configuration.
//!
//! `LiveConfig` carries everything a live session needs: the remote endpoint
//! and credentials, the session-open descriptor fields (model, voice, response
//! modality, system instruction), and the fixed media parameters of the
//! capture and playback pipelines. The shell typically loads this from its own
//! settings store; `#[serde(default)]` keeps older stored configs loadable.

use serde::{Deserialize, Serialize};

/// Default live endpoint (bidirectional generate-content WebSocket).
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Environment variable consulted by [`api_key_from_env`].
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Modality requested for model responses in the session-open descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseModality {
    Audio,
    Text,
}

impl ResponseModality {
    /// Wire spelling used in the session-open descriptor.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
            ResponseModality::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// API key appended to the connection URL.
    pub api_key: String,

    /// WebSocket endpoint, without the key query parameter.
    pub endpoint: String,

    /// Model identifier sent in the session-open descriptor.
    pub model: String,

    /// Prebuilt voice name for spoken responses.
    pub voice: String,

    /// Requested response modality.
    pub response_modality: ResponseModality,

    /// Optional system instruction applied to the whole session.
    pub system_instruction: Option<String>,

    /// Outbound capture rate in Hz. The wire contract is mono PCM16 at this rate.
    pub capture_sample_rate: u32,

    /// Inbound playback rate in Hz.
    pub playback_sample_rate: u32,

    /// Samples per capture window. Must be a small power of two.
    pub capture_window: usize,

    /// Camera sampling interval in milliseconds.
    pub video_interval_ms: u64,

    /// Linear scale applied to camera frames before encoding.
    pub video_scale: f32,

    /// JPEG quality for encoded camera frames (1-100).
    pub jpeg_quality: u8,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "models/gemini-2.0-flash-exp".to_string(),
            voice: "Aoede".to_string(),
            response_modality: ResponseModality::Audio,
            system_instruction: None,
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            capture_window: 4096,
            video_interval_ms: 1000,
            video_scale: 0.2,
            jpeg_quality: 80,
        }
    }
}

impl LiveConfig {
    /// Full connection URL with the key query parameter appended.
    pub fn ws_url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    /// MIME tag for outbound audio chunks, e.g. `audio/pcm;rate=16000`.
    pub fn capture_mime(&self) -> String {
        format!("audio/pcm;rate={}", self.capture_sample_rate)
    }
}

/// Read the API key from the environment, if set and non-empty.
pub fn api_key_from_env() -> Option<String> {
    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.trim().is_empty() => Some(key),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_media_contract() {
        let config = LiveConfig::default();
        assert_eq!(config.capture_sample_rate, 16_000);
        assert_eq!(config.playback_sample_rate, 24_000);
        assert_eq!(config.capture_window, 4096);
        assert!(config.capture_window.is_power_of_two());
        assert_eq!(config.video_interval_ms, 1000);
        assert!((config.video_scale - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.response_modality.as_str(), "AUDIO");
    }

    #[test]
    fn ws_url_appends_key() {
        let config = LiveConfig {
            api_key: "test-key".to_string(),
            ..LiveConfig::default()
        };
        let url = config.ws_url();
        assert!(url.starts_with("wss://"));
        assert!(url.ends_with("?key=test-key"));
    }

    #[test]
    fn capture_mime_tags_the_rate() {
        assert_eq!(LiveConfig::default().capture_mime(), "audio/pcm;rate=16000");
    }

    #[test]
    fn config_round_trips_through_serde_with_defaults() {
        let parsed: LiveConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.model, LiveConfig::default().model);

        let json = serde_json::to_string(&LiveConfig::default()).unwrap();
        let back: LiveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.voice, "Aoede");
    }
}
