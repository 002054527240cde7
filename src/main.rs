mod bot;
mod config;
mod identity;
mod llm;
mod prompt;
mod slack;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Bot;
use crate::config::{Config, TransportMode};
use crate::llm::LlmClient;
use crate::slack::client::SlackClient;

#[tokio::main]
async fn main() -> Result<()> {
    // .env first so RUST_LOG from it applies
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,etherbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load .env: {}", e),
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let mode = config.transport_mode();

    info!("Configuration loaded successfully");
    info!("  Provider: {}", config.llm.provider);
    info!("  Model: {}", config.llm.model);
    info!("  History window: {}", config.reply.history_window);
    info!("  Slash command: {}", config.slack.slash_command);

    let slack = Arc::new(SlackClient::new(
        config.slack.bot_token.clone(),
        config.slack.api_base_url.clone(),
    ));
    let llm = Arc::new(LlmClient::new(config.llm.clone()));
    info!("Completion model: {}", llm.model());

    let bot = Arc::new(Bot::new(slack.clone(), llm, &config));

    // Resolve the bot identity eagerly; a failure here is retried on first event.
    if let Err(e) = bot.identity().bot_user_id().await {
        warn!("Could not resolve bot user id at startup: {}", e);
    }

    match mode {
        TransportMode::Socket { app_token } => slack::socket::run(bot, slack, app_token).await,
        TransportMode::Http { port } => {
            slack::http::run(bot, config.slack.signing_secret.clone(), port).await
        }
    }
}
