use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{Config, ReplyConfig};
use crate::identity::IdentityCache;
use crate::llm::{CompletionTransport, LlmError};
use crate::prompt::{PromptAssembler, PromptEntry, THREAD_BROADCAST};
use crate::slack::{Inbound, MessagingTransport, RawMessage, SlackError, SlackEvent, SlashCommand};

/// Where an admitted event should be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub channel: String,
    pub thread_ts: String,
}

/// Decide whether an event deserves a reply.
///
/// Admitted: `app_mention` events, and `message` events in a direct message.
/// Rejected: any subtype other than a thread broadcast, and anything sent by a
/// bot (the bot itself included, when its id is already known).
pub fn admit(event: &SlackEvent, bot_user_id: Option<&str>) -> Option<Trigger> {
    if event
        .subtype
        .as_deref()
        .is_some_and(|subtype| subtype != THREAD_BROADCAST)
    {
        return None;
    }
    if event.bot_id.is_some() {
        return None;
    }
    if bot_user_id.is_some() && event.user.as_deref() == bot_user_id {
        return None;
    }

    let is_mention = event.event_type == "app_mention";
    let is_dm = event.event_type == "message" && event.channel_type.as_deref() == Some("im");
    if !is_mention && !is_dm {
        return None;
    }

    let channel = event.channel.clone()?;
    let thread_ts = event.thread_ts.clone().or_else(|| event.ts.clone())?;

    Some(Trigger { channel, thread_ts })
}

/// Which stage of the reply pipeline failed.
#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("failed to fetch thread history: {0}")]
    History(SlackError),

    #[error("failed to resolve bot identity: {0}")]
    Identity(SlackError),

    #[error("completion request failed: {0}")]
    Completion(LlmError),
}

impl ReplyError {
    /// The fixed text shown in Slack for this failure.
    pub fn user_message<'a>(&self, replies: &'a ReplyConfig) -> &'a str {
        match self {
            ReplyError::Completion(e) if e.is_rate_limited() => &replies.rate_limited_reply,
            _ => &replies.error_reply,
        }
    }
}

pub struct Bot {
    slack: Arc<dyn MessagingTransport>,
    llm: Arc<dyn CompletionTransport>,
    identity: IdentityCache,
    assembler: PromptAssembler,
    replies: ReplyConfig,
    slash_command: String,
}

impl Bot {
    pub fn new(
        slack: Arc<dyn MessagingTransport>,
        llm: Arc<dyn CompletionTransport>,
        config: &Config,
    ) -> Self {
        let assembler = PromptAssembler::new(
            vec![PromptEntry::system(config.llm.system_prompt.clone())],
            config.reply.history_window,
        );
        Self {
            identity: IdentityCache::new(slack.clone()),
            slack,
            llm,
            assembler,
            replies: config.reply.clone(),
            slash_command: config.slack.slash_command.clone(),
        }
    }

    pub fn identity(&self) -> &IdentityCache {
        &self.identity
    }

    /// Handle inbound work on its own task so a slow reply never holds up the transport.
    pub fn dispatch(self: &Arc<Self>, inbound: Inbound) {
        let bot = Arc::clone(self);
        tokio::spawn(async move {
            match inbound {
                Inbound::Event(event) => bot.handle_event(&event).await,
                Inbound::Command(command) => bot.handle_command(&command).await,
            }
        });
    }

    pub async fn handle_event(&self, event: &SlackEvent) {
        let Some(trigger) = admit(event, self.identity.peek()) else {
            debug!(
                "Ignoring {} event (subtype: {:?})",
                event.event_type, event.subtype
            );
            return;
        };

        info!(
            "Replying to {} in {} (thread {})",
            event.event_type, trigger.channel, trigger.thread_ts
        );
        debug!("Trigger text: {}", event.text.as_deref().unwrap_or_default());

        let history = self
            .slack
            .conversation_replies(&trigger.channel, &trigger.thread_ts)
            .await;

        let placeholder_ts = match self
            .slack
            .post_message(&trigger.channel, &trigger.thread_ts, &self.replies.placeholder)
            .await
        {
            Ok(ts) => ts,
            Err(e) => {
                error!("Failed to post placeholder in {}: {}", trigger.channel, e);
                return;
            }
        };

        let text = match self.generate_reply(history).await {
            Ok(text) => text,
            Err(e) => {
                error!(
                    "Reply failed in {} (thread {}): {}",
                    trigger.channel, trigger.thread_ts, e
                );
                e.user_message(&self.replies).to_string()
            }
        };

        if let Err(e) = self
            .slack
            .update_message(&trigger.channel, &placeholder_ts, &text)
            .await
        {
            error!(
                "Failed to update placeholder {} in {}: {}",
                placeholder_ts, trigger.channel, e
            );
        }
    }

    async fn generate_reply(
        &self,
        history: Result<Vec<RawMessage>, SlackError>,
    ) -> Result<String, ReplyError> {
        let history = history.map_err(ReplyError::History)?;
        let bot_user_id = self
            .identity
            .bot_user_id()
            .await
            .map_err(ReplyError::Identity)?;

        let prompts = self.assembler.assemble(&history, bot_user_id);
        debug!(
            "Assembled {} prompt entries from {} thread message(s)",
            prompts.len(),
            history.len()
        );

        let text = self
            .llm
            .complete(&prompts)
            .await
            .map_err(ReplyError::Completion)?;

        Ok(non_empty(text).unwrap_or_else(|| self.replies.empty_reply.clone()))
    }

    /// One-shot question from the slash command; no thread history involved.
    pub async fn handle_command(&self, command: &SlashCommand) {
        if command.command != self.slash_command {
            warn!("Ignoring unknown slash command {}", command.command);
            return;
        }

        let input = match command.text.trim() {
            "" => self.replies.command_default_input.as_str(),
            text => text,
        };

        info!(
            "Answering {} from {} in {}",
            command.command, command.user_id, command.channel_id
        );

        let text = match self.answer_once(input).await {
            Ok(text) => text,
            Err(e) => {
                error!("{} failed: {}", command.command, e);
                self.replies.command_error_reply.clone()
            }
        };

        if let Err(e) = self.slack.respond(&command.response_url, &text).await {
            error!("Failed to respond to {}: {}", command.command, e);
        }
    }

    async fn answer_once(&self, input: &str) -> Result<String, ReplyError> {
        let bot_user_id = self
            .identity
            .bot_user_id()
            .await
            .map_err(ReplyError::Identity)?;
        let prompts = self.assembler.single_turn(input, bot_user_id);

        let text = self
            .llm
            .complete(&prompts)
            .await
            .map_err(ReplyError::Completion)?;

        Ok(non_empty(text).unwrap_or_else(|| self.replies.command_empty_reply.clone()))
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}
