use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::slack::RawMessage;

/// Marker a human can put in a thread message to speak with system authority.
pub const SYSTEM_MARKER: &str = "[SYSTEM]";

/// Subtype of a thread reply that was also sent to the channel.
pub const THREAD_BROADCAST: &str = "thread_broadcast";

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<@[A-Z0-9]+(?:\|[^>]*)?>").expect("valid mention regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^<>|]+)\|?([^<>]*)>").expect("valid link regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub role: Role,
    pub content: String,
}

impl PromptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Rewrite Slack markup into plain text the model can read.
///
/// The bot's own mention becomes `@Assistant`, any other user mention becomes
/// `@User`, and `<url|label>` links collapse to the label (or the bare URL when
/// there is no label). The result is trimmed.
pub fn strip_mentions(text: Option<&str>, bot_user_id: &str) -> String {
    let Some(text) = text else {
        return String::new();
    };

    let own_mention = if bot_user_id.is_empty() {
        None
    } else {
        Regex::new(&format!(r"(?i)<@{}(?:\|[^>]*)?>", regex::escape(bot_user_id))).ok()
    };

    // A rewrite can expose new markup (`<<url>>` becomes `<url>`), so run to a
    // fixpoint. Every replacement consumes a bracket pair, which bounds the loop.
    let mut rewritten = text.to_string();
    loop {
        let next = rewrite_markup(&rewritten, own_mention.as_ref());
        if next == rewritten {
            break;
        }
        rewritten = next;
    }

    rewritten.trim().to_string()
}

fn rewrite_markup(text: &str, own_mention: Option<&Regex>) -> String {
    let text = match own_mention {
        Some(re) => re.replace_all(text, "@Assistant"),
        None => Cow::Borrowed(text),
    };
    let text = USER_MENTION.replace_all(&text, "@User");
    LINK.replace_all(&text, |caps: &regex::Captures| {
        let label = &caps[2];
        if label.is_empty() {
            caps[1].to_string()
        } else {
            label.to_string()
        }
    })
    .into_owned()
}

/// Turns raw thread history into the role-tagged sequence sent for completion.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    preamble: Vec<PromptEntry>,
    window: usize,
}

impl PromptAssembler {
    pub fn new(preamble: Vec<PromptEntry>, window: usize) -> Self {
        Self { preamble, window }
    }

    /// Build the prompt for a thread: preamble first, then at most `window`
    /// of the most recent conversational messages in chronological order.
    pub fn assemble(&self, history: &[RawMessage], bot_user_id: &str) -> Vec<PromptEntry> {
        let converted: Vec<PromptEntry> = history
            .iter()
            .filter(|m| is_conversational(m))
            .map(|m| convert(m, bot_user_id))
            .collect();

        let skip = converted.len().saturating_sub(self.window);

        let mut prompts = Vec::with_capacity(self.preamble.len() + converted.len() - skip);
        prompts.extend(self.preamble.iter().cloned());
        prompts.extend(converted.into_iter().skip(skip));
        prompts
    }

    /// Build a one-shot prompt: preamble plus a single user turn.
    pub fn single_turn(&self, input: &str, bot_user_id: &str) -> Vec<PromptEntry> {
        let mut prompts = self.preamble.clone();
        prompts.push(PromptEntry::user(strip_mentions(Some(input), bot_user_id)));
        prompts
    }
}

/// Edits, joins, leaves and the like carry a subtype; broadcasts are real replies.
fn is_conversational(message: &RawMessage) -> bool {
    match message.subtype.as_deref() {
        None => true,
        Some(subtype) => subtype == THREAD_BROADCAST,
    }
}

fn convert(message: &RawMessage, bot_user_id: &str) -> PromptEntry {
    let from_bot =
        message.bot_id.is_some() || message.user.as_deref() == Some(bot_user_id);
    let content = strip_mentions(message.text.as_deref(), bot_user_id);

    if from_bot {
        return PromptEntry::new(Role::Assistant, content);
    }

    if content.contains(SYSTEM_MARKER) {
        let content = content.replacen(SYSTEM_MARKER, "", 1).trim().to_string();
        return PromptEntry::new(Role::System, content);
    }

    PromptEntry::new(Role::User, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "UBOT123";

    fn user_msg(user: &str, text: &str) -> RawMessage {
        RawMessage {
            user: Some(user.to_string()),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn assembler() -> PromptAssembler {
        PromptAssembler::new(vec![PromptEntry::system("Be brief.")], 16)
    }

    #[test]
    fn test_own_mention_becomes_assistant() {
        let out = strip_mentions(Some("<@UBOT123> what's up"), BOT);
        assert_eq!(out, "@Assistant what's up");
    }

    #[test]
    fn test_other_mentions_become_user() {
        let out = strip_mentions(Some("ask <@U0ALICE> and <@w99bob|bob>"), BOT);
        assert_eq!(out, "ask @User and @User");
        assert!(!out.contains("<@"));
    }

    #[test]
    fn test_link_with_label_uses_label() {
        let out = strip_mentions(Some("see <https://x.test|Example> please"), BOT);
        assert_eq!(out, "see Example please");
    }

    #[test]
    fn test_link_without_label_uses_url() {
        let out = strip_mentions(Some("see <https://x.test>"), BOT);
        assert_eq!(out, "see https://x.test");
    }

    #[test]
    fn test_nested_link_markup_is_fully_unwrapped() {
        let out = strip_mentions(Some("<<https://x.test>>"), BOT);
        assert_eq!(out, "https://x.test");
        assert!(!out.contains('<'));
    }

    #[test]
    fn test_own_mention_ignores_case() {
        let out = strip_mentions(Some("<@ubot123> and <@UBot123|ether>"), BOT);
        assert_eq!(out, "@Assistant and @Assistant");
    }

    #[test]
    fn test_missing_body_is_empty() {
        assert_eq!(strip_mentions(None, BOT), "");
        assert_eq!(strip_mentions(Some("   "), BOT), "");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            "<@UBOT123> hi <@U0ALICE>, read <https://x.test|this> and <https://y.test>",
            "  plain text  ",
            "@Assistant already clean",
            "<<https://x.test>>",
            "<<@U0ALICE>>",
        ];
        for input in inputs {
            let once = strip_mentions(Some(input), BOT);
            let twice = strip_mentions(Some(&once), BOT);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_preamble_comes_first() {
        let history = vec![user_msg("U1", "hello")];
        let prompts = assembler().assemble(&history, BOT);
        assert_eq!(prompts[0], PromptEntry::system("Be brief."));
        assert_eq!(prompts[1], PromptEntry::user("hello"));
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let history: Vec<RawMessage> = (0..40)
            .map(|i| user_msg("U1", &format!("message {i}")))
            .collect();
        let prompts = assembler().assemble(&history, BOT);

        assert_eq!(prompts.len(), 1 + 16);
        assert_eq!(prompts[0].role, Role::System);
        assert_eq!(prompts[1].content, "message 24");
        assert_eq!(prompts[16].content, "message 39");
    }

    #[test]
    fn test_bot_messages_are_assistant() {
        let by_user_id = user_msg(BOT, "I am the bot");
        let by_bot_id = RawMessage {
            user: Some("UOTHER".to_string()),
            bot_id: Some("B1".to_string()),
            text: Some("[SYSTEM] not an override".to_string()),
            ..Default::default()
        };
        let prompts = assembler().assemble(&[by_user_id, by_bot_id], BOT);

        assert_eq!(prompts[1].role, Role::Assistant);
        assert_eq!(prompts[2].role, Role::Assistant);
        assert!(prompts[2].content.contains(SYSTEM_MARKER));
    }

    #[test]
    fn test_system_marker_overrides_user_role() {
        let history = vec![user_msg("U1", "[SYSTEM] answer in French [SYSTEM]")];
        let prompts = assembler().assemble(&history, BOT);

        assert_eq!(prompts[1].role, Role::System);
        assert_eq!(prompts[1].content, "answer in French [SYSTEM]");
    }

    #[test]
    fn test_subtypes_filtered_except_broadcast() {
        let mut edited = user_msg("U1", "edited");
        edited.subtype = Some("message_changed".to_string());
        let mut joined = user_msg("U2", "joined");
        joined.subtype = Some("channel_join".to_string());
        let mut broadcast = user_msg("U3", "broadcast");
        broadcast.subtype = Some(THREAD_BROADCAST.to_string());

        let prompts = assembler().assemble(&[edited, joined, broadcast], BOT);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].content, "broadcast");
    }

    #[test]
    fn test_single_turn() {
        let prompts = assembler().single_turn(" tell <@UBOT123> a joke ", BOT);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1], PromptEntry::user("tell @Assistant a joke"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&PromptEntry::new(Role::Assistant, "hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
