use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmConfig, VoiceConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Body returned by `/audio/speech`, tagged by the response content type.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechBody {
    Audio(Vec<u8>),
    Text(String),
    Other(String),
}

/// Failure talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The backend refused the request for billing reasons (HTTP 402).
    #[error("backend requires payment: {0}")]
    PaymentRequired(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    voice: VoiceConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig, voice: VoiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            voice,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.config.system_prompt
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.effective_base_url(), path)
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        }
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
        };

        let url = self.url("chat/completions");
        debug!("Sending chat request to {}: {}", self.config.provider, url);

        let response = self
            .auth(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;
        let response = check_status(response, "chat").await?;

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("No content in chat response")?;
        Ok(content)
    }

    /// Speech-to-text for a Telegram voice note (OGG/Opus).
    pub async fn transcribe(&self, audio: Vec<u8>) -> Result<String, LlmError> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .context("Invalid audio mime type")?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.voice.transcription_model.clone())
            .part("file", part);

        let url = self.url("audio/transcriptions");
        debug!("Sending transcription request: {}", url);

        let response = self
            .auth(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .context("Failed to send transcription request")?;
        let response = check_status(response, "transcription").await?;

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(transcription.text.trim().to_string())
    }

    /// Text-to-speech in Opus, the format Telegram plays as a voice note.
    pub async fn speak(&self, text: &str) -> Result<SpeechBody, LlmError> {
        let request = SpeechRequest {
            model: &self.voice.speech_model,
            input: text,
            voice: &self.voice.voice,
            response_format: "opus",
        };

        let url = self.url("audio/speech");
        debug!("Sending speech request: {}", url);

        let response = self
            .auth(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .context("Failed to send speech request")?;
        let response = check_status(response, "speech").await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .context("Failed to read speech response")?;
        Ok(classify_speech_body(&content_type, bytes.to_vec()))
    }
}

async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response.text().await.unwrap_or_default();
    if status == StatusCode::PAYMENT_REQUIRED {
        return Err(LlmError::PaymentRequired(error_body));
    }
    Err(anyhow::anyhow!("{} API error ({}): {}", what, status, error_body).into())
}

fn classify_speech_body(content_type: &str, bytes: Vec<u8>) -> SpeechBody {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let is_audio = mime.starts_with("audio/")
        || mime == "application/octet-stream"
        || mime == "application/ogg";
    if is_audio {
        SpeechBody::Audio(bytes)
    } else if mime == "text/plain" {
        // Other text/* bodies (e.g. HTML) fall through to Other.
        SpeechBody::Text(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        SpeechBody::Other(mime)
    }
}
