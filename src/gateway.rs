use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, LlmClient, LlmError, SpeechBody};
use crate::memory::usage::UsageLedger;
use crate::memory::users::User;

/// What the user sent, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    /// Raw voice-note audio as downloaded from the chat platform.
    Voice(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Voice(_) => "voice",
        }
    }
}

/// What the backend answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Voice(Vec<u8>),
    /// Any content kind the bot cannot relay; carries the kind for diagnostics.
    Unsupported(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The user's quota or entitlement is exhausted.
    #[error("upgrade required")]
    UpgradeRequired,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl From<LlmError> for GatewayError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::PaymentRequired(body) => {
                debug!("Backend answered 402: {}", body);
                GatewayError::UpgradeRequired
            }
            LlmError::Other(e) => GatewayError::Failed(e),
        }
    }
}

/// The AI backend that turns a user message into a reply.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn forward(&self, user: &User, payload: Payload) -> Result<Completion, GatewayError>;
}

/// One completion exchange scoped to a single user and message.
pub struct CompletionSession<'a> {
    gateway: &'a dyn CompletionGateway,
    user: &'a User,
}

impl<'a> CompletionSession<'a> {
    pub fn new(gateway: &'a dyn CompletionGateway, user: &'a User) -> Self {
        Self { gateway, user }
    }

    pub async fn forward(&self, payload: Payload) -> Result<Completion, GatewayError> {
        info!(
            "Forwarding {} message for user {} to completion backend",
            payload.kind(),
            self.user.id
        );
        self.gateway.forward(self.user, payload).await
    }
}

/// Gateway backed by an OpenAI-compatible API: chat for text, and
/// transcription + chat + speech synthesis for voice.
pub struct LlmGateway {
    llm: LlmClient,
}

impl LlmGateway {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn build_messages(&self, user: &User, text: &str) -> Vec<ChatMessage> {
        let mut prompt = self.llm.system_prompt().to_string();
        if !user.full_name.is_empty() {
            prompt.push_str(&format!("\n\nThe user's name is {}.", user.full_name));
        }
        vec![ChatMessage::system(prompt), ChatMessage::user(text)]
    }
}

#[async_trait]
impl CompletionGateway for LlmGateway {
    async fn forward(&self, user: &User, payload: Payload) -> Result<Completion, GatewayError> {
        match payload {
            Payload::Text(text) => {
                let reply = self.llm.chat(&self.build_messages(user, &text)).await?;
                Ok(Completion::Text(reply))
            }
            Payload::Voice(audio) => {
                let transcript = self.llm.transcribe(audio).await?;
                if transcript.is_empty() {
                    return Err(anyhow::anyhow!("Voice note transcribed to empty text").into());
                }
                debug!(
                    "Transcribed voice note for user {}: {}",
                    user.id, transcript
                );

                let messages = self.build_messages(user, &transcript);
                let reply = self.llm.chat(&messages).await?;
                Ok(match self.llm.speak(&reply).await? {
                    SpeechBody::Audio(bytes) => Completion::Voice(bytes),
                    SpeechBody::Text(text) => Completion::Text(text),
                    SpeechBody::Other(kind) => Completion::Unsupported(kind),
                })
            }
        }
    }
}

/// Enforces the daily free-message quota in front of another gateway.
pub struct MeteredGateway<G> {
    inner: G,
    ledger: Arc<dyn UsageLedger>,
    free_messages: u32,
    today: fn() -> NaiveDate,
}

impl<G: CompletionGateway> MeteredGateway<G> {
    /// `free_messages == 0` means unlimited.
    pub fn new(inner: G, ledger: Arc<dyn UsageLedger>, free_messages: u32) -> Self {
        Self {
            inner,
            ledger,
            free_messages,
            today: || Utc::now().date_naive(),
        }
    }
}

#[async_trait]
impl<G: CompletionGateway> CompletionGateway for MeteredGateway<G> {
    async fn forward(&self, user: &User, payload: Payload) -> Result<Completion, GatewayError> {
        if self.free_messages == 0 {
            return self.inner.forward(user, payload).await;
        }

        let day = (self.today)();
        let limit = self.free_messages;
        if !self.ledger.try_reserve(user.id, day, limit).await? {
            let used = self.ledger.messages_on(user.id, day).await?;
            info!(
                "User {} used {}/{} free messages today",
                user.id, used, limit
            );
            return Err(GatewayError::UpgradeRequired);
        }

        // The slot is taken before the backend call; hand it back on failure.
        let result = self.inner.forward(user, payload).await;
        if result.is_err() {
            if let Err(e) = self.ledger.release(user.id, day).await {
                warn!("Failed to release quota slot for user {}: {:#}", user.id, e);
            }
        }
        result
    }
}
