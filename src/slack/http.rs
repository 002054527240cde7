//! HTTP mode: Slack posts Events API callbacks and slash commands to us.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info, warn};

use super::{Inbound, SlackEvent, SlashCommand};
use crate::bot::Bot;

type HmacSha256 = Hmac<Sha256>;

/// Requests older than this are rejected as possible replays.
const MAX_REQUEST_AGE_SECS: i64 = 60 * 5;

const SIGNATURE_HEADER: &str = "x-slack-signature";
const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const RETRY_HEADER: &str = "x-slack-retry-num";
const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone)]
struct HttpState {
    bot: Arc<Bot>,
    signing_secret: Arc<str>,
}

/// Check `X-Slack-Signature` against `v0:{timestamp}:{body}` signed with the app secret.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> bool {
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - sent_at).abs() > MAX_REQUEST_AGE_SECS {
        return false;
    }

    let Some(expected) = signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}

fn verify_request(state: &HttpState, headers: &HeaderMap, body: &[u8]) -> Result<(), StatusCode> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let (Some(timestamp), Some(signature)) = (header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER))
    else {
        warn!("Rejecting Slack request without signature headers");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let now = chrono::Utc::now().timestamp();
    if !verify_signature(&state.signing_secret, timestamp, body, signature, now) {
        warn!("Rejecting Slack request with invalid signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(())
}

/// Slash commands arrive form-encoded, Events API callbacks as JSON.
fn is_form_body(headers: &HeaderMap, body: &[u8]) -> bool {
    match headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(content_type) => content_type.starts_with(FORM_CONTENT_TYPE),
        None => !body.trim_ascii_start().starts_with(b"{"),
    }
}

/// Slack retries a delivery it timed out on even though we already took it.
/// Other retry reasons mean the first delivery may never have reached us.
fn is_timeout_redelivery(headers: &HeaderMap) -> bool {
    headers.contains_key(RETRY_HEADER)
        && headers
            .get(RETRY_REASON_HEADER)
            .and_then(|v| v.to_str().ok())
            == Some("http_timeout")
}

fn dispatch_command(state: &HttpState, body: &[u8]) -> Response {
    match serde_urlencoded::from_bytes::<SlashCommand>(body) {
        Ok(command) => {
            state.bot.dispatch(Inbound::Command(command));
            StatusCode::OK.into_response()
        }
        Err(e) => {
            warn!("Malformed slash command body: {}", e);
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn slack_events(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(status) = verify_request(&state, &headers, &body) {
        return status.into_response();
    }

    if is_form_body(&headers, &body) {
        return dispatch_command(&state, &body);
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Malformed Events API body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = payload
                .get("challenge")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Json(json!({ "challenge": challenge })).into_response()
        }
        Some("event_callback") => {
            if is_timeout_redelivery(&headers) {
                debug!(
                    "Skipping Slack redelivery #{:?} after timeout",
                    headers.get(RETRY_HEADER)
                );
                return StatusCode::OK.into_response();
            }

            match payload
                .get("event")
                .cloned()
                .map(serde_json::from_value::<SlackEvent>)
            {
                Some(Ok(event)) => state.bot.dispatch(Inbound::Event(event)),
                Some(Err(e)) => warn!("Malformed Slack event: {}", e),
                None => warn!("Event callback without an event"),
            }
            StatusCode::OK.into_response()
        }
        other => {
            debug!("Ignoring Events API payload of type {:?}", other);
            StatusCode::OK.into_response()
        }
    }
}

async fn slack_commands(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(status) = verify_request(&state, &headers, &body) {
        return status.into_response();
    }

    dispatch_command(&state, &body)
}

fn router(bot: Arc<Bot>, signing_secret: &str) -> Router {
    let state = HttpState {
        bot,
        signing_secret: Arc::from(signing_secret),
    };

    Router::new()
        .route("/health", get(health))
        .route("/slack/events", post(slack_events))
        .route("/slack/commands", post(slack_commands))
        .with_state(state)
}

/// Serve the Events API receiver until the process exits.
pub async fn run(bot: Arc<Bot>, signing_secret: String, port: u16) -> Result<()> {
    let app = router(bot, &signing_secret);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Starting Slack bot in HTTP mode on {}", addr);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
