//! Text question answering and one-shot speech synthesis over the provider's
//! HTTP endpoints.
//!
//! The client never surfaces provider failures to the caller: `send` returns
//! a fixed apology string on any error, `send_stream` ends its fragment
//! stream with the same apology, and `synthesize_speech` returns `None`.
//! Failures are logged; the conversation keeps going.

use std::sync::OnceLock;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::audio::codec;
use crate::messages::Message;
use crate::prompt::CONTRACT_CONTEXT;
use crate::settings::AppSettings;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Returned in place of an answer whenever a request fails.
pub const FALLBACK_RESPONSE: &str = "I apologize, but I encountered an error processing \
your request. Please try again or contact PCFT leadership.";

/// Global HTTP client for reuse across requests (avoids TLS handshake overhead)
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn get_http_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Errors from the text-generation endpoints. Internal: the public surface
/// converts every variant into the fallback response.
#[derive(Debug)]
pub enum ChatError {
    /// API key not configured
    MissingApiKey,
    /// Network/HTTP error
    Network(String),
    /// The provider returned an error status
    Api { status: u16, message: String },
    /// Failed to parse the provider's response
    Parse(String),
    /// The response carried no usable payload
    EmptyResponse,
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::MissingApiKey => {
                write!(f, "API key not configured. Set GEMINI_API_KEY.")
            }
            ChatError::Network(e) => write!(f, "Network error: {}", e),
            ChatError::Api { status, message } => {
                write!(f, "Provider error ({}): {}", status, message)
            }
            ChatError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ChatError::EmptyResponse => write!(f, "Response carried no content"),
        }
    }
}

impl std::error::Error for ChatError {}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    system_instruction: RequestContent,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate's parts.
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Base64 payload of the first inline-data part, if any.
    fn audio(&self) -> Option<&str> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

// ============================================================================
// Client
// ============================================================================

/// Client for the text and speech-synthesis endpoints.
pub struct ChatClient {
    settings: AppSettings,
    api_key: String,
}

impl ChatClient {
    pub fn new(settings: AppSettings, api_key: String) -> Self {
        Self { settings, api_key }
    }

    /// Answer a question in one shot. Any failure becomes the fallback
    /// apology string; this never errors.
    pub async fn send(&self, query: &str, history: &[Message], reasoning: bool) -> String {
        match self.generate(query, history, reasoning).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Text request failed: {}", e);
                FALLBACK_RESPONSE.to_string()
            }
        }
    }

    /// Answer a question as an ordered, finite stream of text fragments.
    /// On mid-stream failure the stream yields one final apology fragment
    /// and ends; it never restarts.
    pub fn send_stream(
        &self,
        query: &str,
        history: &[Message],
        reasoning: bool,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel::<String>(32);
        let url = self.url(&self.settings.text_model, "streamGenerateContent", true);
        let request = self.text_request(query, history, reasoning);

        tokio::spawn(async move {
            if let Err(e) = run_stream(&url, &request, &tx).await {
                warn!("Streamed request failed: {}", e);
                let _ = tx.send(FALLBACK_RESPONSE.to_string()).await;
            }
        });

        rx
    }

    /// One-shot speech synthesis. `None` means no audio came back; that is
    /// not an error from the caller's perspective.
    pub async fn synthesize_speech(&self, text: &str) -> Option<Vec<u8>> {
        match self.generate_speech(text).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Speech synthesis failed: {}", e);
                None
            }
        }
    }

    fn url(&self, model: &str, method: &str, sse: bool) -> String {
        if sse {
            format!(
                "{}/{}:{}?alt=sse&key={}",
                API_BASE, model, method, self.api_key
            )
        } else {
            format!("{}/{}:{}?key={}", API_BASE, model, method, self.api_key)
        }
    }

    /// The request body for a text call: recent history mapped to provider
    /// roles, the query as the final user turn, the contract context as the
    /// system instruction.
    fn text_request(&self, query: &str, history: &[Message], reasoning: bool) -> GenerateRequest {
        let window_start = history.len().saturating_sub(self.settings.history_limit);
        let mut contents: Vec<RequestContent> = history[window_start..]
            .iter()
            .map(|m| RequestContent {
                role: Some(m.role.provider_label()),
                parts: vec![RequestPart {
                    text: m.content.clone(),
                }],
            })
            .collect();
        contents.push(RequestContent {
            role: Some("user"),
            parts: vec![RequestPart {
                text: query.to_string(),
            }],
        });

        GenerateRequest {
            contents,
            system_instruction: RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: CONTRACT_CONTEXT.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: Some(self.settings.temperature),
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: if reasoning {
                        self.settings.thinking_budget
                    } else {
                        0
                    },
                }),
                response_modalities: None,
                speech_config: None,
            },
        }
    }

    async fn generate(
        &self,
        query: &str,
        history: &[Message],
        reasoning: bool,
    ) -> Result<String, ChatError> {
        if self.api_key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        let url = self.url(&self.settings.text_model, "generateContent", false);
        let request = self.text_request(query, history, reasoning);
        let response = post_json(&url, &request).await?;
        response.text().ok_or(ChatError::EmptyResponse)
    }

    async fn generate_speech(&self, text: &str) -> Result<Vec<u8>, ChatError> {
        if self.api_key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        let url = self.url(&self.settings.tts_model, "generateContent", false);
        let request = GenerateRequest {
            contents: vec![RequestContent {
                role: Some("user"),
                parts: vec![RequestPart {
                    text: text.to_string(),
                }],
            }],
            system_instruction: RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: String::new(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: None,
                thinking_config: None,
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.settings.voice.clone(),
                        },
                    },
                }),
            },
        };

        let response = post_json(&url, &request).await?;
        let b64 = response.audio().ok_or(ChatError::EmptyResponse)?;
        codec::decode(b64).map_err(|e| ChatError::Parse(e.to_string()))
    }
}

async fn post_json(url: &str, request: &GenerateRequest) -> Result<GenerateResponse, ChatError> {
    let response = get_http_client()
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|e| ChatError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(ChatError::Api {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<GenerateResponse>()
        .await
        .map_err(|e| ChatError::Parse(e.to_string()))
}

/// Drive one SSE response, forwarding each fragment in order. Stops early
/// without error if the receiver is dropped.
async fn run_stream(
    url: &str,
    request: &GenerateRequest,
    tx: &mpsc::Sender<String>,
) -> Result<(), ChatError> {
    let response = get_http_client()
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|e| ChatError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        return Err(ChatError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| ChatError::Network(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        // SSE events are newline-delimited; partial lines stay buffered
        // until the rest arrives.
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();
            if payload.is_empty() || payload == "[DONE]" {
                continue;
            }

            match serde_json::from_str::<GenerateResponse>(payload) {
                Ok(event) => {
                    if let Some(fragment) = event.text() {
                        if tx.send(fragment).await.is_err() {
                            debug!("Stream receiver dropped, abandoning response");
                            return Ok(());
                        }
                    }
                }
                Err(e) => warn!("Skipping malformed stream event: {}", e),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Message, MessageRole};

    fn client() -> ChatClient {
        ChatClient::new(AppSettings::default(), "test-key".to_string())
    }

    #[test]
    fn test_request_maps_roles_and_appends_query() {
        let history = vec![
            Message::new(MessageRole::User, "What is the class size limit?"),
            Message::new(MessageRole::Assistant, "35 for grounded courses."),
        ];
        let request = client().text_request("And online?", &history, true);
        let json = serde_json::to_value(&request).unwrap();

        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "And online?");

        assert_eq!(json["generationConfig"]["temperature"], 0.7);
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], 4000);
        assert!(json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("PIERCE COLLEGE"));
    }

    #[test]
    fn test_request_windows_history() {
        let history: Vec<Message> = (0..25)
            .map(|i| Message::new(MessageRole::User, format!("q{}", i)))
            .collect();
        let request = client().text_request("latest", &history, false);

        // 10 most recent history entries plus the query itself
        assert_eq!(request.contents.len(), 11);
        assert_eq!(request.contents[0].parts[0].text, "q15");
    }

    #[test]
    fn test_reasoning_toggle_zeroes_budget() {
        let request = client().text_request("q", &[], false);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
    }

    #[test]
    fn test_response_text_concatenates_parts() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "Article 7 "}, {"text": "covers workload."}]}
            }]
        }"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text().unwrap(), "Article 7 covers workload.");
    }

    #[test]
    fn test_empty_response_yields_none() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(response.text().is_none());
        assert!(response.audio().is_none());
    }

    #[test]
    fn test_response_audio_payload() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "UUUU"}}]}
            }]
        }"#;
        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.audio(), Some("UUUU"));
    }

    #[tokio::test]
    async fn test_send_falls_back_on_failure() {
        // No listener on this key/host combination; the request fails fast
        // and the caller still gets a usable string.
        let client = ChatClient::new(AppSettings::default(), String::new());
        let answer = client.send("anything", &[], true).await;
        assert_eq!(answer, FALLBACK_RESPONSE);
    }
}
