use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::prompt::PromptEntry;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("failed to send completion request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("failed to parse completion response: {0}")]
    Parse(String),
}

impl LlmError {
    /// HTTP status reported by the completion API, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Api { status, .. } => Some(status.as_u16()),
            LlmError::Http(e) => e.status().map(|s| s.as_u16()),
            LlmError::Parse(_) => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }
}

/// Single-call, multi-turn completion.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Returns the generated text, or `None` when the model produced nothing.
    async fn complete(&self, prompts: &[PromptEntry]) -> Result<Option<String>, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptEntry],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl CompletionTransport for LlmClient {
    async fn complete(&self, prompts: &[PromptEntry]) -> Result<Option<String>, LlmError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: prompts,
            max_tokens: self.config.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.effective_base_url().trim_end_matches('/')
        );

        debug!(
            "Sending {} prompt entries to {} ({})",
            prompts.len(),
            url,
            self.config.model
        );

        let mut builder = self.client.post(&url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content))
    }
}
