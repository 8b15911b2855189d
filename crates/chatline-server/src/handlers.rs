//! Connection handlers for Chatline server.
//!
//! This module handles the connection lifecycle: upgrade, inbound decoding,
//! outbound encoding and cleanup. Everything stateful happens in the
//! dispatcher. The internal publish route lets the storage side fan
//! persisted messages out without a client in the loop.

use crate::config::Config;
use crate::dispatcher::{Command, CommandSender, Dispatcher, Outboxes};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use chatline_core::room::validate_room_name;
use chatline_core::{ConnectionId, Hub};
use chatline_protocol::{
    codec, ClientEvent, ProtocolError, ServerEvent, WireFormat, PROTOCOL_VERSION,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Outboxes of open connections.
    pub outboxes: Outboxes,
    /// Commands for the dispatcher.
    pub commands: CommandSender,
    /// Connection slots, one permit per open socket.
    slots: Arc<Semaphore>,
}

impl AppState {
    /// Create app state and spawn its dispatcher.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(config: Config) -> Arc<Self> {
        let outboxes = Outboxes::default();
        let hub = Hub::with_config(config.hub_config());
        let (commands, _task) = Dispatcher::spawn(hub, outboxes.clone(), config.sweep_interval());
        let slots = config.limits.max_connections.min(Semaphore::MAX_PERMITS);

        Arc::new(Self {
            config,
            outboxes,
            commands,
            slots: Arc::new(Semaphore::new(slots)),
        })
    }

    /// Reserve a connection slot. Returns `None` at capacity.
    ///
    /// The slot is released when the permit drops.
    fn reserve_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).try_acquire_owned().ok()
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler));
    if state.config.transport.internal_api {
        router = router.route("/internal/chats/:chat_id/messages", post(publish_handler));
    }
    router.with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let path = config.transport.websocket_path.clone();
    let app = build_app(AppState::start(config));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Chatline server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
        "connections": state.connection_count(),
    }))
}

/// Publish handler: fan a persisted message out to a room.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
    Json(message): Json<Value>,
) -> StatusCode {
    if let Err(e) = validate_room_name(&chat_id) {
        debug!(chat = %chat_id, error = %e, "Publish rejected");
        return StatusCode::BAD_REQUEST;
    }
    if message.is_null() {
        debug!(chat = %chat_id, "Publish rejected, no message");
        return StatusCode::BAD_REQUEST;
    }

    let command = Command::Publish {
        room: chat_id,
        message,
    };
    if state.commands.send(command).is_err() {
        error!("Dispatcher is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    // Reserve before upgrading so concurrent handshakes cannot overshoot
    let Some(slot) = state.reserve_slot() else {
        let limit = state.config.limits.max_connections;
        warn!(limit = limit, "Connection refused, server full");
        metrics::record_refused();
        return (StatusCode::SERVICE_UNAVAILABLE, "Server at capacity").into_response();
    };
    ws.on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

type Sink = SplitSink<WebSocket, Message>;

/// Handle a WebSocket connection. The slot is held until it closes.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: OwnedSemaphorePermit) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    let (outbox, mut inbox) = mpsc::unbounded_channel::<Arc<ServerEvent>>();
    state.outboxes.insert(connection_id.clone(), outbox);

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut format = WireFormat::default();

    let connected = ServerEvent::connected(
        connection_id.as_str(),
        PROTOCOL_VERSION,
        u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX),
    );
    if let Err(e) = send_event(&mut sender, &connected, format).await {
        error!(connection = %connection_id, error = %e, "Failed to send connected event");
        state.outboxes.remove(&connection_id);
        return;
    }
    if state.commands.send(Command::Connect(connection_id.clone())).is_err() {
        error!(connection = %connection_id, "Dispatcher is gone");
        state.outboxes.remove(&connection_id);
        return;
    }

    let max_message_size = state.config.limits.max_message_size;
    let idle_timeout = state.config.idle_timeout();
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some(event) = inbox.recv() => {
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(connection = %connection_id, error = %e, "Send failed");
                    break;
                }
            }

            msg = receiver.next() => {
                idle.as_mut().reset(Instant::now() + idle_timeout);

                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > max_message_size {
                            warn!(
                                connection = %connection_id,
                                size = text.len(),
                                "Oversize frame dropped"
                            );
                            metrics::record_error("oversize");
                            continue;
                        }
                        format = WireFormat::Json;
                        match codec::decode_json::<ClientEvent>(&text) {
                            Ok(event) => {
                                let open =
                                    handle_event(event, &connection_id, &state, &mut sender, format)
                                        .await;
                                if !open {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    connection = %connection_id,
                                    error = %e,
                                    "Malformed event dropped"
                                );
                                metrics::record_error("decode");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > max_message_size {
                            warn!(
                                connection = %connection_id,
                                size = data.len(),
                                "Oversize frame dropped"
                            );
                            metrics::record_error("oversize");
                            continue;
                        }
                        format = WireFormat::MessagePack;
                        read_buffer.extend_from_slice(&data);

                        let mut open = true;
                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => {
                                    open = handle_event(
                                        event,
                                        &connection_id,
                                        &state,
                                        &mut sender,
                                        format,
                                    )
                                    .await;
                                    if !open {
                                        break;
                                    }
                                }
                                Ok(None) => break,
                                Err(ProtocolError::FrameTooLarge(size)) => {
                                    warn!(
                                        connection = %connection_id,
                                        size = size,
                                        "Oversize frame, buffer discarded"
                                    );
                                    metrics::record_error("oversize");
                                    read_buffer.clear();
                                    break;
                                }
                                // The bad payload was consumed; keep reading
                                Err(e) => {
                                    warn!(
                                        connection = %connection_id,
                                        error = %e,
                                        "Malformed frame dropped"
                                    );
                                    metrics::record_error("decode");
                                }
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            () = &mut idle => {
                info!(connection = %connection_id, "Idle timeout, closing");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.outboxes.remove(&connection_id);
    let _ = state.commands.send(Command::Disconnect(connection_id.clone()));

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Route one decoded event. Returns `false` if the connection should close.
async fn handle_event(
    event: ClientEvent,
    connection_id: &ConnectionId,
    state: &AppState,
    sender: &mut Sink,
    format: WireFormat,
) -> bool {
    metrics::record_event(event.name());

    if let ClientEvent::Ping(heartbeat) = event {
        return send_event(sender, &ServerEvent::pong(heartbeat.unwrap_or_default()), format)
            .await
            .is_ok();
    }

    if state
        .commands
        .send(Command::Event(connection_id.clone(), event))
        .is_err()
    {
        error!(connection = %connection_id, "Dispatcher is gone");
        return false;
    }
    true
}

/// Send an event to the WebSocket in the connection's format.
///
/// An event that cannot be encoded is logged and skipped. Only a failed
/// socket write is an error.
async fn send_event(
    sender: &mut Sink,
    event: &ServerEvent,
    format: WireFormat,
) -> Result<(), axum::Error> {
    match encode_event(event, format) {
        Ok(message) => sender.send(message).await,
        Err(e) => {
            warn!(kind = event.name(), error = %e, "Event not encodable, skipped");
            metrics::record_error("encode");
            Ok(())
        }
    }
}

fn encode_event(event: &ServerEvent, format: WireFormat) -> Result<Message, ProtocolError> {
    Ok(match format {
        WireFormat::Json => Message::Text(codec::encode_json(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode(event)?.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_protocol::codec::MAX_FRAME_SIZE;
    use serde_json::json;

    #[test]
    fn test_oversized_event_is_not_encodable() {
        let event = ServerEvent::MessageReceive(json!("x".repeat(MAX_FRAME_SIZE)));
        for format in [WireFormat::Json, WireFormat::MessagePack] {
            assert!(matches!(
                encode_event(&event, format),
                Err(ProtocolError::FrameTooLarge(_))
            ));
        }

        let small = ServerEvent::MessageReceive(json!({"content": "hi"}));
        assert!(matches!(
            encode_event(&small, WireFormat::Json),
            Ok(Message::Text(_))
        ));
        assert!(matches!(
            encode_event(&small, WireFormat::MessagePack),
            Ok(Message::Binary(_))
        ));
    }

    #[tokio::test]
    async fn test_slots_are_reserved_and_released() {
        let mut config = Config::default();
        config.metrics.enabled = false;
        config.limits.max_connections = 1;
        let state = AppState::start(config);

        let first = state.reserve_slot();
        assert!(first.is_some());
        assert!(state.reserve_slot().is_none());

        drop(first);
        assert!(state.reserve_slot().is_some());
    }
}
