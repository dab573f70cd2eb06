//! The subscription connection state machine.
//!
//! A background task owns the WebSocket stream and walks the cycle
//! `Disconnected → Connecting → Handshaking → Streaming → Reconnecting →
//! Connecting → …`. The handshake sends a greeting identifying the client,
//! then one subscribe message per table known to the
//! [`SubscriptionRegistry`] — fire-and-forget, the server answers each
//! subscribe with a full table snapshot. Inbound messages are processed
//! strictly sequentially and dispatched through the registry.
//!
//! Any transport failure, keepalive timeout or protocol error tears the
//! connection down; after a fixed backoff a brand-new transport is built
//! and the whole handshake repeats, which makes the server re-send full
//! snapshots for every table. The registry (the application's
//! subscriptions) survives across reconnects; only the transport is
//! recreated. There is no attempt cap — the client retries indefinitely.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, protocol::Message};

use crate::error::{Result, TableLinkError};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::{ClientMessage, ConnectionOptions, ServerMessage};
use crate::registry::SubscriptionRegistry;
use crate::timeouts::TableLinkTimeouts;

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Handlers slower than this are logged as a warning. Purely advisory:
/// handler execution is never aborted.
const SLOW_HANDLER_WARNING: Duration = Duration::from_secs(2);

/// Sleep duration long enough to never fire; used to park disabled timers.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Where the connection currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Handshaking = 2,
    Streaming = 3,
    Reconnecting = 4,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Handshaking,
            3 => Self::Streaming,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{}", label)
    }
}

/// Commands sent from the public client handle to the connection task.
pub(crate) enum ConnCmd {
    /// Tear down the current transport and rebuild it. Same code path as a
    /// failure-triggered reconnect.
    Reconnect,
    /// Close the connection and end the task.
    Shutdown,
}

/// Everything the background task needs, resolved at build time.
pub(crate) struct ConnectionConfig {
    pub ws_url: String,
    pub greeting_name: String,
    pub timeouts: TableLinkTimeouts,
    pub options: ConnectionOptions,
    pub event_handlers: EventHandlers,
}

/// Derive the WebSocket endpoint from the configured base URL.
pub(crate) fn resolve_ws_url(base_url: &str) -> Result<String> {
    let base = reqwest::Url::parse(base_url.trim()).map_err(|e| {
        TableLinkError::Configuration(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    if base.host_str().is_none() {
        return Err(TableLinkError::Configuration(
            "base_url must include a host".to_string(),
        ));
    }

    let mut ws_url = base;
    let scheme = match ws_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TableLinkError::Configuration(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        }
    };
    ws_url
        .set_scheme(scheme)
        .map_err(|_| TableLinkError::Configuration("Failed to set WebSocket URL scheme".into()))?;
    ws_url.set_path("/changes");
    ws_url.set_query(None);
    ws_url.set_fragment(None);

    Ok(ws_url.to_string())
}

/// The greeting identity string: application name plus library version.
pub(crate) fn greeting_name(app_name: &str) -> String {
    format!("{};ClientVersion:{}", app_name, env!("CARGO_PKG_VERSION"))
}

/// The exact message sequence of one handshake: the greeting first, then
/// one subscribe per table, in registry order.
pub(crate) fn handshake_messages(greeting: &str, tables: &[String]) -> Vec<ClientMessage> {
    let mut messages = Vec::with_capacity(tables.len() + 1);
    messages.push(ClientMessage::Greeting {
        name: greeting.to_string(),
    });
    for table_name in tables {
        messages.push(ClientMessage::Subscribe {
            table_name: table_name.clone(),
        });
    }
    messages
}

fn set_state(state: &AtomicU8, value: ConnectionState) {
    state.store(value as u8, Ordering::SeqCst);
}

async fn send_message(ws: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| TableLinkError::Transport(format!("Failed to send message: {}", e)))
}

/// Open a fresh transport and run the handshake on it.
///
/// A brand-new connection object is built on every call — a half-broken
/// stream from a previous cycle is never reused.
async fn establish(
    config: &ConnectionConfig,
    registry: &SubscriptionRegistry,
    state: &AtomicU8,
) -> Result<WsStream> {
    set_state(state, ConnectionState::Connecting);
    log::debug!("[tablelink] connecting to {}", config.ws_url);

    let request = config.ws_url.as_str().into_client_request().map_err(|e| {
        TableLinkError::Transport(format!("Failed to build WebSocket request: {}", e))
    })?;

    let connect_timeout = config.timeouts.connection_timeout;
    let connect_result = if !TableLinkTimeouts::is_no_timeout(connect_timeout) {
        tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request)).await
    } else {
        Ok(tokio_tungstenite::connect_async(request).await)
    };

    let mut ws = match connect_result {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            return Err(TableLinkError::Transport(format!("Connection failed: {}", e)));
        }
        Err(_) => {
            return Err(TableLinkError::Timeout(format!(
                "Connection timeout ({:?})",
                connect_timeout
            )));
        }
    };

    set_state(state, ConnectionState::Handshaking);
    let tables = registry.tables();
    for message in handshake_messages(&config.greeting_name, &tables) {
        send_message(&mut ws, &message).await?;
    }
    log::info!(
        "[tablelink] connected, subscribed to {} table(s): {}",
        tables.len(),
        tables.join(", ")
    );

    Ok(ws)
}

/// Decode one inbound frame and route it through the registry.
///
/// Both a payload that fails to decode and a handler that rejects its rows
/// are fatal for the current connection: the decoder is likely out of sync
/// with the stream, so the error is escalated to the reconnect path rather
/// than tolerated mid-stream.
fn handle_payload(registry: &SubscriptionRegistry, raw: &[u8]) -> Result<()> {
    let message: ServerMessage = serde_json::from_slice(raw)?;

    if matches!(message, ServerMessage::Ping) {
        log::debug!("[tablelink] keepalive: received ping");
        return Ok(());
    }

    let kind = message.kind();
    let table = message.table_name().unwrap_or("--unknown--").to_string();
    log::debug!("[tablelink] received {} event for table '{}'", kind, table);

    let started = Instant::now();
    let result = registry.dispatch(message);
    let elapsed = started.elapsed();
    if elapsed > SLOW_HANDLER_WARNING {
        log::warn!(
            "[tablelink] slow {} handler for table '{}': took {:?}",
            kind,
            table,
            elapsed
        );
    }

    if let Err(ref e) = result {
        log::error!(
            "[tablelink] failed to apply {} event for table '{}': {}",
            kind,
            table,
            e
        );
    }
    result
}

/// The background task owning the subscription connection.
///
/// Runs until a shutdown command arrives or every command sender is
/// dropped. All per-connection state dies with each connection; the
/// registry and its replicas live on.
pub(crate) async fn connection_task(
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    config: ConnectionConfig,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<AtomicU8>,
    ready_tx: Option<tokio::sync::oneshot::Sender<Result<()>>>,
) {
    let handlers = config.event_handlers.clone();
    let mut ready_tx = ready_tx;

    let keepalive = config.timeouts.keepalive_interval;
    let has_keepalive = !TableLinkTimeouts::is_no_timeout(keepalive);
    let dead_after = config.timeouts.dead_connection_timeout;
    let has_dead_check = !TableLinkTimeouts::is_no_timeout(dead_after);

    let mut ws_stream: Option<WsStream> = None;
    let mut shutdown = false;
    // Set after a failure so the next attempt waits out the backoff delay.
    // The very first connect attempt runs immediately.
    let mut backoff_before_connect = false;
    let mut ping_deadline = TokioInstant::now() + FAR_FUTURE;
    let mut dead_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        if shutdown {
            if let Some(mut ws) = ws_stream.take() {
                let _ = ws.close(None).await;
                handlers.emit_disconnect(DisconnectReason::new("Client shut down"));
            }
            set_state(&state, ConnectionState::Disconnected);
            log::info!("[tablelink] connection task stopped");
            return;
        }

        let Some(ws) = ws_stream.as_mut() else {
            // ── Not connected: back off if needed, then try again ──
            if backoff_before_connect {
                if !config.options.auto_reconnect {
                    set_state(&state, ConnectionState::Disconnected);
                    // Reconnection is manual: wait for an explicit command.
                    match cmd_rx.recv().await {
                        Some(ConnCmd::Reconnect) => {}
                        Some(ConnCmd::Shutdown) | None => {
                            shutdown = true;
                            continue;
                        }
                    }
                } else {
                    set_state(&state, ConnectionState::Reconnecting);
                    let delay = Duration::from_millis(config.options.reconnect_delay_ms);
                    log::info!("[tablelink] reconnecting in {:?}", delay);

                    // Wait out the fixed backoff, but stay responsive to
                    // commands: a forced reconnect skips the rest of the
                    // delay, a shutdown ends the task.
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            biased;
                            cmd = cmd_rx.recv() => {
                                match cmd {
                                    Some(ConnCmd::Reconnect) => break,
                                    Some(ConnCmd::Shutdown) | None => {
                                        shutdown = true;
                                        break;
                                    }
                                }
                            }
                            _ = &mut sleep => break,
                        }
                    }
                    if shutdown {
                        continue;
                    }
                }
            }

            match establish(&config, &registry, &state).await {
                Ok(stream) => {
                    ws_stream = Some(stream);
                    backoff_before_connect = false;
                    set_state(&state, ConnectionState::Streaming);
                    handlers.emit_connect();
                    ping_deadline =
                        TokioInstant::now() + if has_keepalive { keepalive } else { FAR_FUTURE };
                    dead_deadline =
                        TokioInstant::now() + if has_dead_check { dead_after } else { FAR_FUTURE };
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Err(e) => {
                    log::warn!("[tablelink] connection attempt failed: {}", e);
                    handlers.emit_error(ConnectionError::new(e.to_string(), true));
                    backoff_before_connect = true;
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }
            continue;
        };

        // ── Streaming: multiplex commands, keepalive and inbound frames ──
        let ping_sleep = tokio::time::sleep_until(ping_deadline);
        tokio::pin!(ping_sleep);
        let dead_sleep = tokio::time::sleep_until(dead_deadline);
        tokio::pin!(dead_sleep);

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnCmd::Reconnect) => {
                        log::info!("[tablelink] reconnect requested, dropping current connection");
                        handlers.emit_disconnect(DisconnectReason::new("Reconnect requested"));
                        ws_stream = None;
                        backoff_before_connect = true;
                    }
                    Some(ConnCmd::Shutdown) | None => {
                        shutdown = true;
                    }
                }
            }

            // No traffic at all within the dead-connection window.
            _ = &mut dead_sleep, if has_dead_check => {
                log::warn!(
                    "[tablelink] no traffic for {:?}, treating connection as dead",
                    dead_after
                );
                handlers.emit_disconnect(DisconnectReason::new(format!(
                    "No traffic within {:?}",
                    dead_after
                )));
                ws_stream = None;
                backoff_before_connect = true;
            }

            // Idle: probe the server.
            _ = &mut ping_sleep, if has_keepalive => {
                log::debug!("[tablelink] keepalive: sending ping");
                if let Err(e) = send_message(ws, &ClientMessage::Ping).await {
                    log::warn!("[tablelink] keepalive ping failed: {}", e);
                    handlers.emit_disconnect(DisconnectReason::new(format!(
                        "Keepalive ping failed: {}",
                        e
                    )));
                    ws_stream = None;
                    backoff_before_connect = true;
                } else {
                    ping_deadline = TokioInstant::now() + keepalive;
                }
            }

            frame = ws.next() => {
                // Any frame proves the connection is alive.
                dead_deadline =
                    TokioInstant::now() + if has_dead_check { dead_after } else { FAR_FUTURE };
                ping_deadline =
                    TokioInstant::now() + if has_keepalive { keepalive } else { FAR_FUTURE };

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_payload(&registry, text.as_bytes()) {
                            handlers.emit_error(ConnectionError::new(e.to_string(), true));
                            handlers.emit_disconnect(DisconnectReason::new(format!(
                                "Protocol error: {}",
                                e
                            )));
                            ws_stream = None;
                            backoff_before_connect = true;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = handle_payload(&registry, &data) {
                            handlers.emit_error(ConnectionError::new(e.to_string(), true));
                            handlers.emit_disconnect(DisconnectReason::new(format!(
                                "Protocol error: {}",
                                e
                            )));
                            ws_stream = None;
                            backoff_before_connect = true;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                            None => DisconnectReason::new("Server closed connection"),
                        };
                        log::warn!("[tablelink] connection closed by server: {}", reason);
                        handlers.emit_disconnect(reason);
                        ws_stream = None;
                        backoff_before_connect = true;
                    }
                    Some(Err(e)) => {
                        log::warn!("[tablelink] transport error: {}", e);
                        handlers.emit_error(ConnectionError::new(e.to_string(), true));
                        handlers.emit_disconnect(DisconnectReason::new(format!(
                            "Transport error: {}",
                            e
                        )));
                        ws_stream = None;
                        backoff_before_connect = true;
                    }
                    None => {
                        log::warn!("[tablelink] connection stream ended");
                        handlers.emit_disconnect(DisconnectReason::new("Stream ended"));
                        ws_stream = None;
                        backoff_before_connect = true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Handshake Tests ====================

    #[test]
    fn test_handshake_sends_greeting_first() {
        let tables = vec!["orders".to_string(), "prices".to_string()];
        let messages = handshake_messages("app;ClientVersion:0.3.1", &tables);

        assert_eq!(messages.len(), 3);
        assert!(matches!(
            &messages[0],
            ClientMessage::Greeting { name } if name == "app;ClientVersion:0.3.1"
        ));
        assert!(matches!(
            &messages[1],
            ClientMessage::Subscribe { table_name } if table_name == "orders"
        ));
        assert!(matches!(
            &messages[2],
            ClientMessage::Subscribe { table_name } if table_name == "prices"
        ));
    }

    #[test]
    fn test_handshake_with_no_tables_is_greeting_only() {
        let messages = handshake_messages("app", &[]);
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], ClientMessage::Greeting { .. }));
    }

    #[test]
    fn test_handshake_repeats_identically_per_cycle() {
        let tables = vec!["prices".to_string()];
        let first = handshake_messages("app", &tables);
        let second = handshake_messages("app", &tables);

        // One subscribe per table per cycle, no duplicates accumulated.
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        let subscribes = first
            .iter()
            .filter(|m| matches!(m, ClientMessage::Subscribe { .. }))
            .count();
        assert_eq!(subscribes, 1);
    }

    #[test]
    fn test_greeting_name_carries_client_version() {
        let name = greeting_name("pricing-service");
        assert!(name.starts_with("pricing-service;ClientVersion:"));
        assert!(name.ends_with(env!("CARGO_PKG_VERSION")));
    }

    // ==================== URL Tests ====================

    #[test]
    fn test_resolve_ws_url_maps_schemes() {
        assert_eq!(
            resolve_ws_url("http://localhost:5125").unwrap(),
            "ws://localhost:5125/changes"
        );
        assert_eq!(
            resolve_ws_url("https://nosql.example.com").unwrap(),
            "wss://nosql.example.com/changes"
        );
        assert_eq!(
            resolve_ws_url("ws://10.0.0.1:5125").unwrap(),
            "ws://10.0.0.1:5125/changes"
        );
    }

    #[test]
    fn test_resolve_ws_url_rejects_unknown_scheme() {
        assert!(resolve_ws_url("ftp://localhost").is_err());
        assert!(resolve_ws_url("not a url").is_err());
    }

    // ==================== State Tests ====================

    #[test]
    fn test_connection_state_round_trips_through_u8() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Handshaking,
            ConnectionState::Streaming,
            ConnectionState::Reconnecting,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    // ==================== Dispatch Tests ====================

    #[test]
    fn test_handle_payload_rejects_garbage() {
        let registry = SubscriptionRegistry::new();
        assert!(handle_payload(&registry, b"not json").is_err());
        assert!(handle_payload(&registry, br#"{"type":"vacuum"}"#).is_err());
    }

    #[test]
    fn test_handle_payload_accepts_ping_and_unrouted_events() {
        let registry = SubscriptionRegistry::new();
        assert!(handle_payload(&registry, br#"{"type":"ping"}"#).is_ok());
        assert!(handle_payload(
            &registry,
            br#"{"type":"init_table","table_name":"nobody","data":[]}"#
        )
        .is_ok());
    }
}
