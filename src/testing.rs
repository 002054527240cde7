//! In-memory transports for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::llm::{CompletionTransport, LlmError};
use crate::prompt::PromptEntry;
use crate::slack::{MessagingTransport, RawMessage, SlackError};

/// A side effect observed by [`FakeSlack`].
#[derive(Debug, Clone, PartialEq)]
pub enum SlackCall {
    Replies { channel: String, ts: String },
    Post { channel: String, thread_ts: String, text: String },
    Update { channel: String, ts: String, text: String },
    Respond { response_url: String, text: String },
}

pub struct FakeSlack {
    user_id: String,
    history: Mutex<Vec<RawMessage>>,
    fail_auth: AtomicBool,
    fail_history: AtomicBool,
    fail_post: AtomicBool,
    auth_calls: AtomicUsize,
    calls: Mutex<Vec<SlackCall>>,
}

impl FakeSlack {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            history: Mutex::new(Vec::new()),
            fail_auth: AtomicBool::new(false),
            fail_history: AtomicBool::new(false),
            fail_post: AtomicBool::new(false),
            auth_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_history(self, history: Vec<RawMessage>) -> Self {
        *self.history.lock().unwrap() = history;
        self
    }

    pub fn fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_post(&self, fail: bool) {
        self.fail_post.store(fail, Ordering::SeqCst);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<SlackCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: SlackCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn api_error(method: &str) -> SlackError {
        SlackError::Api {
            method: method.to_string(),
            error: "fake_failure".to_string(),
        }
    }
}

#[async_trait]
impl MessagingTransport for FakeSlack {
    async fn auth_test(&self) -> Result<String, SlackError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(Self::api_error("auth.test"));
        }
        Ok(self.user_id.clone())
    }

    async fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> Result<Vec<RawMessage>, SlackError> {
        self.record(SlackCall::Replies {
            channel: channel.to_string(),
            ts: ts.to_string(),
        });
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(Self::api_error("conversations.replies"));
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<String, SlackError> {
        self.record(SlackCall::Post {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
            text: text.to_string(),
        });
        if self.fail_post.load(Ordering::SeqCst) {
            return Err(Self::api_error("chat.postMessage"));
        }
        Ok("9999.0001".to_string())
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), SlackError> {
        self.record(SlackCall::Update {
            channel: channel.to_string(),
            ts: ts.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn respond(&self, response_url: &str, text: &str) -> Result<(), SlackError> {
        self.record(SlackCall::Respond {
            response_url: response_url.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// What [`FakeLlm`] answers with.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Text(Option<String>),
    Status(u16),
}

pub struct FakeLlm {
    reply: FakeReply,
    requests: Mutex<Vec<Vec<PromptEntry>>>,
}

impl FakeLlm {
    pub fn replying(text: &str) -> Self {
        Self::new(FakeReply::Text(Some(text.to_string())))
    }

    pub fn new(reply: FakeReply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<PromptEntry>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionTransport for FakeLlm {
    async fn complete(&self, prompts: &[PromptEntry]) -> Result<Option<String>, LlmError> {
        self.requests.lock().unwrap().push(prompts.to_vec());
        match &self.reply {
            FakeReply::Text(text) => Ok(text.clone()),
            FakeReply::Status(code) => Err(LlmError::Api {
                status: StatusCode::from_u16(*code).unwrap(),
                body: "fake".to_string(),
            }),
        }
    }
}
