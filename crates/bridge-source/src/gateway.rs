//! Real-time gateway stream: one independent reconnect loop per session.
//!
//! Grounded on the broader corpus's persistent-duplex-connection handling
//! (the teacher itself only deals in request/response and change-stream
//! polling); the frame/heartbeat/identify shape here follows a real gateway
//! client example, adapted to this bridge's fixed reconnect delay and
//! watchdog instead of exponential backoff.

use crate::session::Session;
use crate::state::GuildRegistry;
use bridge_common::Message;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

const GATEWAY_VERSION: &str = "9";
const IDENTIFY_INTENTS: u64 = 33281; // GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
const SESSION_WATCHDOG: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Serialize)]
struct Heartbeat {
    op: u8,
    d: Option<u64>,
}

#[derive(Debug, Serialize)]
struct IdentifyProperties<'a> {
    #[serde(rename = "$os")]
    os: &'a str,
    #[serde(rename = "$browser")]
    browser: &'a str,
    #[serde(rename = "$device")]
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct IdentifyData<'a> {
    token: &'a str,
    intents: u64,
    properties: IdentifyProperties<'a>,
    large_threshold: u32,
    compress: bool,
}

#[derive(Debug, Serialize)]
struct Identify<'a> {
    op: u8,
    d: IdentifyData<'a>,
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

#[derive(Debug, Deserialize, Default)]
struct MessageCreatePayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    author: AuthorPayload,
}

#[derive(Debug, Deserialize, Default)]
struct AuthorPayload {
    #[serde(default)]
    username: String,
}

/// Runs the gateway loop for one session forever (until `running` flips
/// false). Each iteration is a fresh handshake; failures and the 1-hour
/// watchdog both fall through to the same reconnect-delay sleep.
pub async fn run_gateway_loop(
    session: Arc<Session>,
    registry: Arc<GuildRegistry>,
    ingress: mpsc::Sender<Message>,
    reconnect_delay: Duration,
    mut running: watch::Receiver<bool>,
) {
    while *running.borrow() {
        match run_once(&session, &registry, &ingress, &mut running).await {
            Ok(()) => debug!(username = %session.username, "gateway connection closed cleanly"),
            Err(err) => warn!(username = %session.username, error = %err, "gateway connection failed"),
        }

        if !*running.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = running.changed() => {}
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum GatewayRunError {
    #[error("gateway url lookup failed: {0}")]
    UrlLookup(#[from] crate::rest::RestError),
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed before HELLO was received")]
    NoHello,
    #[error("malformed frame: {0}")]
    BadFrame(#[from] serde_json::Error),
}

async fn run_once(
    session: &Session,
    registry: &GuildRegistry,
    ingress: &mpsc::Sender<Message>,
    running: &mut watch::Receiver<bool>,
) -> Result<(), GatewayRunError> {
    let base_url = session.rest.gateway_url().await?;
    let url = format!("{base_url}/?v={GATEWAY_VERSION}&encoding=json");
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let Some(Ok(first)) = stream.next().await else {
        return Err(GatewayRunError::NoHello);
    };
    let frame: Frame = parse_frame(&first)?;
    if frame.op != 10 {
        return Err(GatewayRunError::NoHello);
    }
    let hello: Hello = serde_json::from_value(frame.d)?;

    let identify = Identify {
        op: 2,
        d: IdentifyData {
            token: &session.token,
            intents: IDENTIFY_INTENTS,
            properties: IdentifyProperties {
                os: "linux",
                browser: "bridge",
                device: "bridge",
            },
            large_threshold: 50,
            compress: false,
        },
    };
    sink.send(WsMessage::Text(serde_json::to_string(&identify)?))
        .await?;

    let mut heartbeat_ticker = tokio::time::interval(Duration::from_millis(hello.heartbeat_interval));
    heartbeat_ticker.tick().await; // first tick fires immediately; discard

    let watchdog = tokio::time::sleep(SESSION_WATCHDOG);
    tokio::pin!(watchdog);

    let result = loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if let Err(err) = handle_frame(&msg, registry, ingress).await {
                            break Err(err);
                        }
                    }
                    Some(Err(err)) => break Err(err.into()),
                    None => break Ok(()),
                }
            }
            _ = heartbeat_ticker.tick() => {
                let heartbeat = Heartbeat { op: 1, d: None };
                let payload = match serde_json::to_string(&heartbeat) {
                    Ok(payload) => payload,
                    Err(err) => break Err(err.into()),
                };
                if let Err(err) = sink.send(WsMessage::Text(payload)).await {
                    break Err(err.into());
                }
                debug!(username = %session.username, "heartbeat sent");
            }
            _ = &mut watchdog => {
                info!(username = %session.username, "recycling gateway session after watchdog expiry");
                break Ok(());
            }
            _ = running.changed() => {
                if !*running.borrow() {
                    break Ok(());
                }
            }
        }
    };

    let _ = sink.close().await;
    result
}

fn parse_frame(msg: &WsMessage) -> Result<Frame, serde_json::Error> {
    match msg {
        WsMessage::Text(text) => serde_json::from_str(text),
        WsMessage::Binary(bytes) => serde_json::from_slice(bytes),
        _ => Ok(Frame {
            op: 255,
            d: Value::Null,
            t: None,
        }),
    }
}

async fn handle_frame(
    msg: &WsMessage,
    registry: &GuildRegistry,
    ingress: &mpsc::Sender<Message>,
) -> Result<(), GatewayRunError> {
    let frame = parse_frame(msg)?;
    if frame.op != 0 {
        return Ok(());
    }
    if frame.t.as_deref() != Some("MESSAGE_CREATE") {
        return Ok(());
    }

    let payload: MessageCreatePayload = match serde_json::from_value(frame.d) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "skipping malformed MESSAGE_CREATE payload");
            return Ok(());
        }
    };
    if payload.content.trim().is_empty() {
        return Ok(());
    }
    let Some(guild_id) = payload.guild_id else {
        return Ok(());
    };

    let Some((guild_name, channel_name)) =
        registry.resolve_names(&guild_id, &payload.channel_id)
    else {
        return Ok(());
    };

    let timestamp = chrono::DateTime::parse_from_rfc3339(&payload.timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    match Message::new(
        &payload.content,
        timestamp,
        &guild_name,
        &channel_name,
        &payload.author.username,
        Some(payload.id),
        Some(payload.channel_id.clone()),
        Some(guild_id.clone()),
    ) {
        Ok(message) => {
            if let Some(mut guild) = registry.guilds.get_mut(&guild_id) {
                if let Some(channel) = guild.channels.get_mut(&payload.channel_id) {
                    channel.message_count += 1;
                    channel.last_message_time = Some(timestamp);
                    channel.stream_accessible = true;
                }
                guild.last_activity = Some(timestamp);
            }
            if ingress.try_send(message).is_err() {
                registry.record_dropped_message();
                warn!("ingress queue full, dropping streamed message");
            }
        }
        Err(err) => warn!(error = %err, "skipping invalid streamed message"),
    }
    Ok(())
}
