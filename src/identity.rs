use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::slack::{MessagingTransport, SlackError};

/// The bot's own Slack user id, looked up once per process.
///
/// Concurrent first callers wait on a single `auth.test`. A failed lookup
/// leaves the cell empty, so the next caller tries again.
pub struct IdentityCache {
    transport: Arc<dyn MessagingTransport>,
    user_id: OnceCell<String>,
}

impl IdentityCache {
    pub fn new(transport: Arc<dyn MessagingTransport>) -> Self {
        Self {
            transport,
            user_id: OnceCell::new(),
        }
    }

    pub async fn bot_user_id(&self) -> Result<&str, SlackError> {
        self.user_id
            .get_or_try_init(|| async {
                let user_id = self.transport.auth_test().await?;
                info!("Resolved bot user id: {}", user_id);
                Ok::<_, SlackError>(user_id)
            })
            .await
            .map(String::as_str)
    }

    /// The cached id, without triggering a lookup.
    pub fn peek(&self) -> Option<&str> {
        self.user_id.get().map(String::as_str)
    }
}
