pub mod client;
pub mod http;
pub mod socket;

use async_trait::async_trait;
use serde::Deserialize;

/// One entry of a thread as returned by `conversations.replies`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// The inner `event` object of an Events API callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_type: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// A slash command invocation. Arrives form-encoded over HTTP and as JSON
/// inside Socket Mode envelopes; both use the same field names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlashCommand {
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    pub response_url: String,
}

/// Work handed from a transport mode to the bot.
#[derive(Debug, Clone)]
pub enum Inbound {
    Event(SlackEvent),
    Command(SlashCommand),
}

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("request to Slack failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Slack {method} returned error: {error}")]
    Api { method: String, error: String },

    #[error("Slack {method} rate limited (retry after {retry_after:?}s)")]
    RateLimited {
        method: String,
        retry_after: Option<u64>,
    },

    #[error("Slack {method} response missing `{field}`")]
    MissingField { method: String, field: String },
}

/// The Slack capabilities the bot needs.
#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// The bot's own user id (`auth.test`).
    async fn auth_test(&self) -> Result<String, SlackError>;

    /// Every message of the thread rooted at `ts`, oldest first.
    async fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<RawMessage>, SlackError>;

    /// Post into a thread and return the new message's `ts`.
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<String, SlackError>;

    async fn update_message(&self, channel: &str, ts: &str, text: &str)
        -> Result<(), SlackError>;

    /// Answer a slash command through its `response_url`.
    async fn respond(&self, response_url: &str, text: &str) -> Result<(), SlackError>;
}
