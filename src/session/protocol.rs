//! Wire messages for the live channel.
//!
//! Client messages are externally tagged JSON objects (`{"setup": ...}`,
//! `{"realtimeInput": ...}`, `{"clientContent": ...}`). Server messages carry
//! one payload field per message; everything is optional so new server fields
//! never break parsing. Only the payload shapes that drive capture and
//! playback timing are modeled; deeper message semantics stay opaque.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::capture::VideoFrame;
use crate::config::LiveConfig;

/// Base64 media payload with its MIME descriptor; used for outbound chunks
/// and inbound `inlineData` parts alike.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

/// One content part: text or inline media.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

/// A turn (or instruction block): optional role plus parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

/// Session-open descriptor, sent once after the socket opens.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Outbound messages. Serde's external tagging produces the single-key
/// objects the endpoint expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SessionSetup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Session-open descriptor from the session config.
    pub fn setup(config: &LiveConfig) -> Self {
        ClientMessage::Setup(SessionSetup {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality.as_str().to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: config.system_instruction.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part {
                    text: Some(text.clone()),
                    inline_data: None,
                }],
            }),
        })
    }

    /// One capture window as an outbound media chunk.
    pub fn realtime_audio(pcm: &[u8], mime_type: &str) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob {
                mime_type: mime_type.to_string(),
                data: STANDARD.encode(pcm),
            }],
        })
    }

    /// One encoded camera frame as an outbound media chunk.
    pub fn realtime_video(frame: &VideoFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob {
                mime_type: frame.mime_type.to_string(),
                data: STANDARD.encode(&frame.data),
            }],
        })
    }

    /// A complete user text turn submitted over the live channel.
    pub fn user_text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }],
            turn_complete: true,
        })
    }
}

/// Acknowledgment of the session-open descriptor. Arrives empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub interrupted: bool,
    pub turn_complete: bool,
    pub generation_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorPayload {
    pub message: Option<String>,
}

/// One inbound message. Unknown fields are ignored so protocol additions on
/// the server side stay harmless.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
    pub error: Option<ErrorPayload>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Audio payloads in model-turn order.
    pub fn audio_chunks(&self) -> Vec<&MediaBlob> {
        self.model_parts()
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.starts_with("audio/pcm"))
            .collect()
    }

    /// Non-empty text payloads in model-turn order.
    pub fn text_parts(&self) -> Vec<&str> {
        self.model_parts()
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.is_empty())
            .collect()
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|content| content.interrupted)
            .unwrap_or(false)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|content| content.turn_complete || content.generation_complete)
            .unwrap_or(false)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .map(|error| error.message.as_deref().unwrap_or("unknown server error"))
    }

    fn model_parts(&self) -> impl Iterator<Item = &Part> {
        self.server_content
            .as_ref()
            .and_then(|content| content.model_turn.as_ref())
            .map(|turn| turn.parts.as_slice())
            .unwrap_or(&[])
            .iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseModality;

    fn test_config() -> LiveConfig {
        LiveConfig {
            model: "models/test-live".to_string(),
            voice: "Aoede".to_string(),
            response_modality: ResponseModality::Audio,
            system_instruction: Some("Be brief.".to_string()),
            ..LiveConfig::default()
        }
    }

    #[test]
    fn setup_serializes_the_session_descriptor() {
        let json = serde_json::to_string(&ClientMessage::setup(&test_config())).unwrap();

        assert!(json.starts_with("{\"setup\":"));
        assert!(json.contains("\"model\":\"models/test-live\""));
        assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"voiceName\":\"Aoede\""));
        assert!(json.contains("\"systemInstruction\""));
        assert!(json.contains("Be brief."));
    }

    #[test]
    fn setup_omits_missing_system_instruction() {
        let config = LiveConfig {
            system_instruction: None,
            ..test_config()
        };
        let json = serde_json::to_string(&ClientMessage::setup(&config)).unwrap();
        assert!(!json.contains("systemInstruction"));
    }

    #[test]
    fn realtime_audio_wraps_base64_pcm() {
        let msg = ClientMessage::realtime_audio(&[0x01, 0x02], "audio/pcm;rate=16000");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.starts_with("{\"realtimeInput\":"));
        assert!(json.contains("\"mediaChunks\""));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
        assert!(json.contains(&format!("\"data\":\"{}\"", STANDARD.encode([0x01, 0x02]))));
    }

    #[test]
    fn realtime_video_tags_the_frame_mime() {
        let frame = VideoFrame {
            mime_type: "image/jpeg",
            data: vec![0xFF, 0xD8, 0xFF],
        };
        let json = serde_json::to_string(&ClientMessage::realtime_video(&frame)).unwrap();
        assert!(json.contains("\"mimeType\":\"image/jpeg\""));
        assert!(json.contains(&STANDARD.encode([0xFF, 0xD8, 0xFF])));
    }

    #[test]
    fn user_text_is_a_complete_turn() {
        let json = serde_json::to_string(&ClientMessage::user_text("hello")).unwrap();
        assert!(json.starts_with("{\"clientContent\":"));
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"text\":\"hello\""));
        assert!(json.contains("\"turnComplete\":true"));
    }

    #[test]
    fn parses_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.audio_chunks().is_empty());
    }

    #[test]
    fn parses_inbound_audio_chunks() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQI="}},
                        {"text": "spoken words"},
                        {"inlineData": {"mimeType": "image/png", "data": "xxxx"}}
                    ]
                }
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();

        let chunks = msg.audio_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, "AQI=");
        assert_eq!(msg.text_parts(), vec!["spoken words"]);
        assert!(!msg.is_interrupted());
    }

    #[test]
    fn parses_interruption_flag() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent": {"interrupted": true}}"#).unwrap();
        assert!(msg.is_interrupted());
        assert!(!msg.is_turn_complete());
    }

    #[test]
    fn turn_complete_and_generation_complete_both_finish_the_turn() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent": {"turnComplete": true}}"#).unwrap();
        assert!(msg.is_turn_complete());

        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent": {"generationComplete": true}}"#).unwrap();
        assert!(msg.is_turn_complete());
    }

    #[test]
    fn parses_error_payload() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"error": {"message": "quota exceeded"}}"#).unwrap();
        assert_eq!(msg.error_message(), Some("quota exceeded"));

        let msg: ServerMessage = serde_json::from_str(r#"{"error": {}}"#).unwrap();
        assert_eq!(msg.error_message(), Some("unknown server error"));

        let msg: ServerMessage = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(msg.error_message(), None);
    }

    #[test]
    fn unknown_server_fields_are_ignored() {
        let json = r#"{
            "usageMetadata": {"promptTokenCount": 10},
            "serverContent": {"turnComplete": true}
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_turn_complete());
    }
}
