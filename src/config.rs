use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.provider {
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VoiceConfig {
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_speech_model")]
    pub speech_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            transcription_model: default_transcription_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Messages a user may send per UTC day before the paywall. 0 disables the quota.
    #[serde(default = "default_free_messages")]
    pub free_messages: u32,
    #[serde(default = "default_purchase_url")]
    pub purchase_url: String,
    #[serde(default = "default_support_url")]
    pub invoices_url: String,
    #[serde(default = "default_support_url")]
    pub cancel_url: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            free_messages: default_free_messages(),
            purchase_url: default_purchase_url(),
            invoices_url: default_support_url(),
            cancel_url: default_support_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Offset the greeting hours are evaluated in, e.g. "+01:00".
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
        }
    }
}

impl ScheduleConfig {
    pub fn offset(&self) -> Result<FixedOffset> {
        self.utc_offset
            .parse::<FixedOffset>()
            .with_context(|| format!("Invalid schedule.utc_offset: {}", self.utc_offset))
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_system_prompt() -> String {
    "You are a warm, practical health and mental wellbeing coach. \
     Help the user reframe negative thoughts, suggest small actionable steps, \
     encourage physical activity and keep answers short and conversational."
        .to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_speech_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "nova".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mindcoach.db")
}

fn default_free_messages() -> u32 {
    25
}

fn default_purchase_url() -> String {
    "https://paystack.com/pay/gvasuwrv-l".to_string()
}

fn default_support_url() -> String {
    "https://linkedin.com/in/navicstein".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        Self::finish(Self::read(path)?, |key| std::env::var(key).ok())
    }

    /// Like `load`, but a missing file means built-in defaults, so the bot
    /// can run from `TELEGRAM_BOT_TOKEN` alone.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        Self::load_or_default_with(path, |key| std::env::var(key).ok())
    }

    fn load_or_default_with<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = if path.exists() {
            Self::read(path)?
        } else {
            info!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        Self::finish(config, lookup)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    fn finish<F>(mut config: Self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// `TELEGRAM_BOT_TOKEN` and `LLM_API_KEY` win over the file.
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(key) = lookup("LLM_API_KEY").filter(|k| !k.is_empty()) {
            self.llm.api_key = key;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("telegram.bot_token is empty and TELEGRAM_BOT_TOKEN is not set");
        }
        self.schedule.offset()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [telegram]
        bot_token = "123:abc"

        [llm]
        model = "gpt-4o-mini"
    "#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Openai);
        assert_eq!(config.llm.effective_base_url(), "https://api.openai.com/v1");
        assert_eq!(config.billing.free_messages, 25);
        assert_eq!(config.voice.speech_model, "tts-1");
        assert_eq!(config.memory.database_path, PathBuf::from("mindcoach.db"));
        assert_eq!(config.schedule.offset().unwrap().local_minus_utc(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_base_url_override_is_trimmed() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.llm.base_url = "http://localhost:8080/v1/".to_string();
        assert_eq!(config.llm.effective_base_url(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_env_overrides_token_and_key() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.apply_env_overrides(|key| match key {
            "TELEGRAM_BOT_TOKEN" => Some("999:env".to_string()),
            "LLM_API_KEY" => Some("sk-env".to_string()),
            _ => None,
        });
        assert_eq!(config.telegram.bot_token, "999:env");
        assert_eq!(config.llm.api_key, "sk-env");
    }

    #[test]
    fn test_empty_env_does_not_clobber_file_token() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.apply_env_overrides(|_| Some(String::new()));
        assert_eq!(config.telegram.bot_token, "123:abc");
    }

    #[test]
    fn test_missing_token_fails_validation() {
        let config = Config::parse(
            r#"
            [telegram]

            [llm]
            model = "m"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    fn token_only(key: &str) -> Option<String> {
        (key == "TELEGRAM_BOT_TOKEN").then(|| "42:env".to_string())
    }

    #[test]
    fn test_missing_file_runs_from_env_token() {
        let path = std::env::temp_dir().join("mindcoach-no-such-config.toml");

        let config = Config::load_or_default_with(&path, token_only).unwrap();
        assert_eq!(config.telegram.bot_token, "42:env");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.billing.free_messages, 25);

        assert!(Config::load_or_default_with(&path, |_| None).is_err());
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_sections_are_optional() {
        let config = Config::parse("[telegram]\nbot_token = \"1:x\"\n").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_schedule_offset_parses() {
        let content = format!("{MINIMAL}\n[schedule]\nutc_offset = \"+01:00\"\n");
        let config = Config::parse(&content).unwrap();
        assert_eq!(config.schedule.offset().unwrap().local_minus_utc(), 3600);

        let bad = ScheduleConfig {
            utc_offset: "Lagos".to_string(),
        };
        assert!(bad.offset().is_err());
    }
}
