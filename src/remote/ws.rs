//! WebSocket plumbing for the remote change feed: URL resolution, wire
//! frames, the subscribe handshake, and the background reader task.

use crate::error::{ChannelError, LinkError};
use crate::event::ChangeEvent;
use crate::row::Row;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

pub(crate) type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Feed endpoint on the backend.
const FEED_PATH: &str = "/v1/content/feed";

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

// ── Wire frames ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame {
    Subscribe {
        id: String,
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<FilterSpec>,
    },
    Unsubscribe {
        id: String,
    },
}

/// Wire form of an equality filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FilterSpec {
    pub column: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    Subscribed {
        id: String,
    },
    Insert {
        id: String,
        row: Map<String, Value>,
    },
    Update {
        id: String,
        row: Map<String, Value>,
        #[serde(default)]
        old_row: Option<Map<String, Value>>,
    },
    Delete {
        id: String,
        old_row: Map<String, Value>,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        message: String,
    },
}

impl ServerFrame {
    /// Convert a data frame into a change event; `None` for control frames.
    pub(crate) fn into_change_event(self) -> Option<ChangeEvent> {
        match self {
            Self::Insert { row, .. } => Some(ChangeEvent::Inserted { row: Row::from(row) }),
            Self::Update { row, old_row, .. } => Some(ChangeEvent::Updated {
                row: Row::from(row),
                previous: old_row.map(Row::from),
            }),
            Self::Delete { old_row, .. } => Some(ChangeEvent::Deleted {
                row: Row::from(old_row),
            }),
            Self::Subscribed { .. } | Self::Error { .. } => None,
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Derive the feed URL from the HTTP base URL.
pub(crate) fn resolve_ws_url(base_url: &str) -> Result<reqwest::Url, LinkError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| LinkError::Configuration(format!("invalid base URL '{}': {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::Configuration(format!(
                "unsupported URL scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| LinkError::Configuration(format!("cannot derive feed URL from '{}'", base_url)))?;
    url.set_path(FEED_PATH);
    Ok(url)
}

/// Spread keepalive pings of concurrent channels over time so they do not
/// fire in lockstep.
pub(crate) fn jitter_keepalive(interval: Duration, seed: &str) -> Duration {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let window_ms = ((interval.as_millis() as u64) / 5).max(1);
    interval + Duration::from_millis(hasher.finish() % window_ms)
}

pub(crate) async fn connect_ws(
    request: tokio_tungstenite::tungstenite::handshake::client::Request,
    connect_timeout: Duration,
) -> Result<WsStream, ChannelError> {
    let connecting = connect_async(request);
    let result = if connect_timeout.is_zero() {
        connecting.await
    } else {
        match tokio::time::timeout(connect_timeout, connecting).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ChannelError::recoverable(format!(
                    "feed connection timeout ({:?})",
                    connect_timeout
                )))
            }
        }
    };
    match result {
        Ok((stream, _response)) => Ok(stream),
        Err(e) => Err(ChannelError::recoverable(format!(
            "feed connection failed: {}",
            e
        ))),
    }
}

pub(crate) async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> Result<(), ChannelError> {
    let payload = serde_json::to_string(frame)
        .map_err(|e| ChannelError::persistent(format!("failed to serialize frame: {}", e)))?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| ChannelError::recoverable(format!("failed to send frame: {}", e)))
}

pub(crate) fn parse_frame(text: &str) -> Result<ServerFrame, LinkError> {
    serde_json::from_str(text).map_err(|e| LinkError::Serialization(e.to_string()))
}

/// Wait for the backend to acknowledge the subscription. Data frames that
/// race ahead of the ack are forwarded, not dropped.
pub(crate) async fn wait_for_subscribed(
    ws: &mut WsStream,
    subscription_id: &str,
    events: &mpsc::Sender<ChangeEvent>,
    subscribe_timeout: Duration,
) -> Result<(), ChannelError> {
    let deadline = Instant::now()
        + if subscribe_timeout.is_zero() {
            FAR_FUTURE
        } else {
            subscribe_timeout
        };

    loop {
        let frame = match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                return Err(ChannelError::recoverable(format!(
                    "timed out waiting for subscribe ack ({:?})",
                    subscribe_timeout
                )))
            }
        };
        match frame {
            Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                Ok(ServerFrame::Subscribed { id }) if id == subscription_id => return Ok(()),
                Ok(ServerFrame::Subscribed { id }) => {
                    log::debug!("ignoring ack for unknown subscription '{}'", id);
                }
                Ok(ServerFrame::Error { message, .. }) => {
                    return Err(ChannelError::recoverable(format!(
                        "backend rejected subscription: {}",
                        message
                    )));
                }
                Ok(frame) => {
                    if let Some(event) = frame.into_change_event() {
                        let _ = events.send(event).await;
                    }
                }
                Err(e) => log::warn!("unparseable feed frame during subscribe: {}", e),
            },
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(ChannelError::recoverable(format!(
                    "feed error during subscribe: {}",
                    e
                )))
            }
            None => {
                return Err(ChannelError::recoverable(
                    "feed closed during subscribe".to_string(),
                ))
            }
        }
    }
}

/// Background task that owns the WebSocket and forwards parsed change events
/// into the channel task's event queue.
///
/// Exits (dropping the sender, which the channel task observes as feed loss)
/// on stop signal, stream end, transport error, or pong timeout. Keepalive
/// pings are sent after `keepalive_interval` of idleness.
pub(crate) async fn reader_loop(
    mut ws: WsStream,
    subscription_id: String,
    events: mpsc::Sender<ChangeEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    keepalive_interval: Duration,
    pong_timeout: Duration,
) {
    let has_keepalive = !keepalive_interval.is_zero();
    let keepalive_dur = if has_keepalive {
        jitter_keepalive(keepalive_interval, &subscription_id)
    } else {
        FAR_FUTURE
    };
    let mut idle_deadline = Instant::now() + keepalive_dur;

    let has_pong_timeout = has_keepalive && !pong_timeout.is_zero();
    let mut awaiting_pong = false;
    let mut pong_deadline = Instant::now() + FAR_FUTURE;

    loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);
        let pong_sleep = tokio::time::sleep_until(pong_deadline);
        tokio::pin!(pong_sleep);

        tokio::select! {
            biased;

            _ = &mut stop_rx => {
                let _ = send_frame(&mut ws, &ClientFrame::Unsubscribe {
                    id: subscription_id.clone(),
                }).await;
                let _ = ws.close(None).await;
                return;
            }

            _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                log::warn!(
                    "pong timeout ({:?}) on feed '{}', dropping connection",
                    pong_timeout,
                    subscription_id
                );
                return;
            }

            _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                if ws.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
                if has_pong_timeout {
                    awaiting_pong = true;
                    pong_deadline = Instant::now() + pong_timeout;
                }
                idle_deadline = Instant::now() + keepalive_dur;
            }

            frame = ws.next() => {
                idle_deadline = Instant::now() + keepalive_dur;
                if awaiting_pong {
                    awaiting_pong = false;
                    pong_deadline = Instant::now() + FAR_FUTURE;
                }

                match frame {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(ServerFrame::Error { message, .. }) => {
                            log::warn!("feed '{}' reported: {}", subscription_id, message);
                        }
                        Ok(parsed) => {
                            if let Some(event) = parsed.into_change_event() {
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => log::warn!("unparseable feed frame: {}", e),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        log::info!("feed '{}' closed by backend", subscription_id);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("feed '{}' transport error: {}", subscription_id, e);
                        return;
                    }
                    None => {
                        log::info!("feed '{}' stream ended", subscription_id);
                        return;
                    }
                }
            }
        }
    }
}
