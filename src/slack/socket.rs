//! Socket Mode: Slack pushes envelopes over a WebSocket opened with the app token.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::client::SlackClient;
use super::{Inbound, SlackEvent, SlashCommand};
use crate::bot::Bot;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

/// What to do with one envelope after it has been acknowledged.
#[derive(Debug)]
enum Routed {
    Inbound(Inbound),
    Disconnect(String),
    Ignore,
}

fn route(envelope: &Envelope) -> Routed {
    match envelope.envelope_type.as_str() {
        "events_api" => {
            if envelope.payload.get("type").and_then(Value::as_str) != Some("event_callback") {
                return Routed::Ignore;
            }
            match envelope
                .payload
                .get("event")
                .cloned()
                .map(serde_json::from_value::<SlackEvent>)
            {
                Some(Ok(event)) => Routed::Inbound(Inbound::Event(event)),
                Some(Err(e)) => {
                    warn!("Socket Mode: malformed event: {}", e);
                    Routed::Ignore
                }
                None => Routed::Ignore,
            }
        }
        "slash_commands" => match serde_json::from_value::<SlashCommand>(envelope.payload.clone())
        {
            Ok(command) => Routed::Inbound(Inbound::Command(command)),
            Err(e) => {
                warn!("Socket Mode: malformed slash command: {}", e);
                Routed::Ignore
            }
        },
        "disconnect" => Routed::Disconnect(
            envelope
                .reason
                .clone()
                .unwrap_or_else(|| "unspecified".to_string()),
        ),
        "hello" => {
            info!("Socket Mode: connected");
            Routed::Ignore
        }
        other => {
            debug!("Socket Mode: ignoring {} envelope", other);
            Routed::Ignore
        }
    }
}

/// Keep a Socket Mode session alive for the life of the process.
pub async fn run(bot: Arc<Bot>, client: Arc<SlackClient>, app_token: String) -> Result<()> {
    info!("Starting Slack bot in Socket Mode...");

    loop {
        match run_session(&bot, &client, &app_token).await {
            Ok(reason) => {
                info!("Socket Mode: server requested disconnect ({}), reconnecting", reason);
            }
            Err(e) => {
                warn!("Socket Mode disconnected: {:#}", e);
                info!("Socket Mode: reconnecting in {}s...", RECONNECT_DELAY.as_secs());
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// One WebSocket connection. Returns `Ok` when Slack asks us to reconnect.
async fn run_session(bot: &Arc<Bot>, client: &SlackClient, app_token: &str) -> Result<String> {
    let ws_url = client
        .open_connection(app_token)
        .await
        .context("Failed to open Socket Mode connection")?;

    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .context("WebSocket connect failed")?;
    let (mut write, mut read) = ws_stream.split();

    while let Some(message) = read.next().await {
        match message.context("WebSocket read error")? {
            WsMessage::Text(text) => {
                let envelope: Envelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("Socket Mode: failed to parse envelope: {}", e);
                        continue;
                    }
                };

                // Slack redelivers anything not acknowledged within 3 seconds.
                if let Some(envelope_id) = &envelope.envelope_id {
                    let ack = json!({ "envelope_id": envelope_id });
                    if let Err(e) = write.send(WsMessage::Text(ack.to_string())).await {
                        warn!("Socket Mode: failed to send ack: {}", e);
                    }
                }

                match route(&envelope) {
                    Routed::Inbound(inbound) => bot.dispatch(inbound),
                    Routed::Disconnect(reason) => return Ok(reason),
                    Routed::Ignore => {}
                }
            }
            WsMessage::Ping(data) => {
                if let Err(e) = write.send(WsMessage::Pong(data)).await {
                    warn!("Socket Mode: failed to send pong: {}", e);
                }
            }
            WsMessage::Close(_) => anyhow::bail!("WebSocket closed by server"),
            _ => {}
        }
    }

    anyhow::bail!("WebSocket stream ended")
}
