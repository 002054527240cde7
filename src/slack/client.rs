use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{MessagingTransport, RawMessage, SlackError};

pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// Page size for `conversations.replies`.
const REPLIES_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct RepliesPage {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

/// Slack Web API client authenticated with the bot token.
pub struct SlackClient {
    client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(bot_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Send a Web API request and unwrap Slack's `{ ok, error }` envelope.
    async fn call(
        &self,
        method: &str,
        token: &str,
        request: RequestBuilder,
    ) -> Result<Value, SlackError> {
        debug!("Calling Slack {}", method);

        let response = request.bearer_auth(token).send().await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(SlackError::RateLimited {
                method: method.to_string(),
                retry_after,
            });
        }

        let body: Value = response.error_for_status()?.json().await?;

        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(SlackError::Api {
                method: method.to_string(),
                error,
            });
        }

        Ok(body)
    }

    fn string_field(method: &str, body: &Value, field: &str) -> Result<String, SlackError> {
        body.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SlackError::MissingField {
                method: method.to_string(),
                field: field.to_string(),
            })
    }

    /// Request a Socket Mode WebSocket URL (`apps.connections.open`).
    pub async fn open_connection(&self, app_token: &str) -> Result<String, SlackError> {
        let method = "apps.connections.open";
        let request = self.client.post(self.url(method));
        let body = self.call(method, app_token, request).await?;
        Self::string_field(method, &body, "url")
    }
}

#[async_trait]
impl MessagingTransport for SlackClient {
    async fn auth_test(&self) -> Result<String, SlackError> {
        let method = "auth.test";
        let request = self.client.post(self.url(method));
        let body = self.call(method, &self.bot_token, request).await?;
        Self::string_field(method, &body, "user_id")
    }

    async fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<RawMessage>, SlackError> {
        let method = "conversations.replies";
        let limit = REPLIES_PAGE_LIMIT.to_string();
        let mut messages = Vec::new();
        let mut cursor = String::new();

        loop {
            let request = {
                let mut query = vec![("channel", channel), ("ts", ts), ("limit", limit.as_str())];
                if !cursor.is_empty() {
                    query.push(("cursor", cursor.as_str()));
                }
                self.client.get(self.url(method)).query(&query)
            };
            let body = self.call(method, &self.bot_token, request).await?;
            let page: RepliesPage = serde_json::from_value(body).map_err(|e| SlackError::Api {
                method: method.to_string(),
                error: format!("malformed response: {}", e),
            })?;

            messages.extend(page.messages);

            match page.response_metadata {
                Some(meta) if !meta.next_cursor.is_empty() => cursor = meta.next_cursor,
                _ => break,
            }
        }

        debug!(
            "Fetched {} message(s) from thread {} in {}",
            messages.len(),
            ts,
            channel
        );
        Ok(messages)
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<String, SlackError> {
        let method = "chat.postMessage";
        let request = self.client.post(self.url(method)).json(&json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": text,
        }));
        let body = self.call(method, &self.bot_token, request).await?;
        Self::string_field(method, &body, "ts")
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), SlackError> {
        let method = "chat.update";
        let request = self.client.post(self.url(method)).json(&json!({
            "channel": channel,
            "ts": ts,
            "text": text,
        }));
        self.call(method, &self.bot_token, request).await?;
        Ok(())
    }

    async fn respond(&self, response_url: &str, text: &str) -> Result<(), SlackError> {
        // response_url is pre-authorized and answers with plain text, not the Web API envelope.
        self.client
            .post(response_url)
            .json(&json!({
                "response_type": "ephemeral",
                "text": text,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
