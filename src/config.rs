use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::slack::client::SLACK_API_BASE;

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

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return &self.base_url;
        }
        match self.provider {
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }
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

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub signing_secret: String,
    /// App-level token; when set the bot connects over Socket Mode.
    #[serde(default)]
    pub app_token: Option<String>,
    #[serde(default = "default_slash_command")]
    pub slash_command: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            signing_secret: String::new(),
            app_token: None,
            slash_command: default_slash_command(),
            api_base_url: default_api_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// User-facing strings and the history window.
#[derive(Debug, Deserialize, Clone)]
pub struct ReplyConfig {
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    #[serde(default = "default_empty_reply")]
    pub empty_reply: String,
    #[serde(default = "default_error_reply")]
    pub error_reply: String,
    #[serde(default = "default_rate_limited_reply")]
    pub rate_limited_reply: String,
    #[serde(default = "default_command_input")]
    pub command_default_input: String,
    #[serde(default = "default_command_empty_reply")]
    pub command_empty_reply: String,
    #[serde(default = "default_command_error_reply")]
    pub command_error_reply: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            placeholder: default_placeholder(),
            empty_reply: default_empty_reply(),
            error_reply: default_error_reply(),
            rate_limited_reply: default_rate_limited_reply(),
            command_default_input: default_command_input(),
            command_empty_reply: default_command_empty_reply(),
            command_error_reply: default_command_error_reply(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
}

/// How Slack delivers events to the process.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMode {
    Socket { app_token: String },
    Http { port: u16 },
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_system_prompt() -> String {
    "You are Ether, the AI teammate for The Alchemists. \
     Communicate like a professional colleague: brief, clear, and proactive. \
     When unsure, ask a short clarifying question instead of guessing. \
     Never exceed 4 sentences"
        .to_string()
}

fn default_slash_command() -> String {
    "/askgpt".to_string()
}

fn default_api_base_url() -> String {
    SLACK_API_BASE.to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_history_window() -> usize {
    16
}

fn default_placeholder() -> String {
    "Thinking…".to_string()
}

fn default_empty_reply() -> String {
    "I couldn't generate a reply.".to_string()
}

fn default_error_reply() -> String {
    "Sorry, I ran into an error.".to_string()
}

fn default_rate_limited_reply() -> String {
    "Rate limited, please try again in a moment.".to_string()
}

fn default_command_input() -> String {
    "Say hello!".to_string()
}

fn default_command_empty_reply() -> String {
    "…".to_string()
}

fn default_command_error_reply() -> String {
    "Failed to get a response. Please try again.".to_string()
}

impl Config {
    /// Load `path` if it exists, then layer the process environment on top.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    /// Override values from environment-style variables. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SLACK_BOT_TOKEN") {
            self.slack.bot_token = v;
        }
        if let Some(v) = get("SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = v;
        }
        if let Some(v) = get("SLACK_APP_TOKEN") {
            self.slack.app_token = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(port) = get("PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn transport_mode(&self) -> TransportMode {
        match self.slack.app_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => TransportMode::Socket {
                app_token: token.to_string(),
            },
            _ => TransportMode::Http {
                port: self.server.port,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.slack.bot_token.trim().is_empty() {
            anyhow::bail!("Slack bot token is not set (slack.bot_token or SLACK_BOT_TOKEN)");
        }
        if self.llm.provider != LlmProvider::Ollama && self.llm.api_key.trim().is_empty() {
            anyhow::bail!(
                "API key for provider '{}' is not set (llm.api_key or OPENAI_API_KEY)",
                self.llm.provider
            );
        }
        if matches!(self.transport_mode(), TransportMode::Http { .. })
            && self.slack.signing_secret.trim().is_empty()
        {
            anyhow::bail!(
                "Slack signing secret is required in HTTP mode (slack.signing_secret or SLACK_SIGNING_SECRET)"
            );
        }
        if self.reply.history_window == 0 {
            anyhow::bail!("reply.history_window must be at least 1");
        }
        if !self.slack.slash_command.starts_with('/') {
            anyhow::bail!(
                "slack.slash_command must start with '/': {}",
                self.slack.slash_command
            );
        }
        Ok(())
    }
}
