//! Wire types for the bidirectional live audio session
//!
//! The provider's realtime endpoint speaks JSON over WebSocket. The client
//! opens with a `setup` message, then streams `realtimeInput` media chunks;
//! the server acknowledges with `setupComplete` and delivers `serverContent`
//! events carrying any combination of inline audio, transcription fragments,
//! an interruption flag, and a turn-complete flag.

use serde::{Deserialize, Serialize};

use crate::audio::MediaChunk;

/// Realtime session endpoint; the API key is appended as a query parameter.
pub const LIVE_API_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Messages sent from the client to the realtime endpoint
#[derive(Debug, Clone, Serialize)]
pub enum ClientMessage {
    /// Session configuration, sent once immediately after connecting
    #[serde(rename = "setup")]
    Setup(SessionSetup),

    /// A block of encoded microphone audio
    #[serde(rename = "realtimeInput")]
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub generation_config: LiveGenerationConfig,
    pub system_instruction: Content,
    /// Presence enables user-side (input) transcription
    pub input_audio_transcription: EmptyConfig,
    /// Presence enables model-side (output) transcription
    pub output_audio_transcription: EmptyConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveGenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`; the endpoint treats key presence as "enabled".
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyConfig {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// Build the session configuration message: audio-only responses, the
    /// designated voice, the system prompt, and transcription on both sides.
    pub fn setup(model: &str, voice: &str, system_prompt: &str) -> Self {
        ClientMessage::Setup(SessionSetup {
            model: format!("models/{}", model),
            generation_config: LiveGenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: system_prompt.to_string(),
                }],
            },
            input_audio_transcription: EmptyConfig {},
            output_audio_transcription: EmptyConfig {},
        })
    }

    /// Wrap one captured media chunk for the send path.
    pub fn media(chunk: MediaChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            }],
        })
    }
}

// ============================================================================
// Server events
// ============================================================================

/// One event from the realtime endpoint. The server signals by key presence
/// rather than a type tag, so every field is optional and unknown keys are
/// ignored; an event with nothing we recognize is simply inert.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerEvent {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub output_transcription: Option<TranscriptionFragment>,
    pub input_transcription: Option<TranscriptionFragment>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPart {
    pub inline_data: Option<MediaBlob>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionFragment {
    #[serde(default)]
    pub text: String,
}

impl ServerContent {
    /// Base64 audio payload of the first inline-data part, if any.
    pub fn audio_data(&self) -> Option<&str> {
        self.model_turn
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup("live-audio-model", "Zephyr", "You are helpful.");
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"setup\":"));
        assert!(json.contains("\"model\":\"models/live-audio-model\""));
        assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"voiceName\":\"Zephyr\""));
        assert!(json.contains("\"inputAudioTranscription\":{}"));
        assert!(json.contains("\"outputAudioTranscription\":{}"));
    }

    #[test]
    fn test_media_chunk_serialization() {
        let msg = ClientMessage::media(MediaChunk {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        });
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"realtimeInput\":"));
        assert!(json.contains("\"mediaChunks\":[{"));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
        assert!(json.contains("\"data\":\"AAAA\""));
    }

    #[test]
    fn test_setup_complete_deserialization() {
        let event: ServerEvent = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(event.setup_complete.is_some());
        assert!(event.server_content.is_none());
    }

    #[test]
    fn test_audio_payload_deserialization() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UUUU"}}
                    ]
                }
            }
        }"#;

        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let content = event.server_content.unwrap();
        assert_eq!(content.audio_data(), Some("UUUU"));
        assert!(!content.interrupted);
        assert!(!content.turn_complete);
    }

    #[test]
    fn test_transcription_fragments_deserialization() {
        let json = r#"{
            "serverContent": {
                "outputTranscription": {"text": "Hello"},
                "inputTranscription": {"text": "Hi"}
            }
        }"#;

        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let content = event.server_content.unwrap();
        assert_eq!(content.output_transcription.unwrap().text, "Hello");
        assert_eq!(content.input_transcription.unwrap().text, "Hi");
    }

    #[test]
    fn test_interrupted_and_turn_complete_flags() {
        let json = r#"{"serverContent": {"interrupted": true, "turnComplete": true}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        let content = event.server_content.unwrap();
        assert!(content.interrupted);
        assert!(content.turn_complete);
    }

    #[test]
    fn test_unknown_event_is_inert() {
        // Future server messages must not kill deserialization
        let json = r#"{"goAway": {"timeLeft": "10s"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(event.setup_complete.is_none());
        assert!(event.server_content.is_none());
        assert!(event.error.is_none());
    }

    #[test]
    fn test_audio_data_absent_without_inline_data() {
        let json = r#"{"serverContent": {"modelTurn": {"parts": [{"text": "spoken"}]}}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert!(event.server_content.unwrap().audio_data().is_none());
    }
}
