use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::hub::{CloseReason, Connection, HubError};
use crate::metrics::{WsMessageMetrics, WsMetrics};
use crate::server::AppState;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};

/// How long the writer gets to flush a close frame after cleanup
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler for `/ws/{user_id}`
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = extract_token(&query, &headers) else {
        return AppError::Auth("Missing authentication token".to_string()).into_response();
    };

    let claims = match state.jwt_validator.validate(&token) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    tracing::info!(user_id = %user_id, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, claims.sub))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn close_frame(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.close_code(),
        reason: reason.as_str().into(),
    }))
}

#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, claimed_user_id, authenticated_user_id),
    fields(user_id = %claimed_user_id)
)]
async fn handle_socket(
    mut socket: WebSocket,
    state: AppState,
    claimed_user_id: String,
    authenticated_user_id: String,
) {
    let admission = match state
        .hub
        .on_connect(&claimed_user_id, &authenticated_user_id)
    {
        Ok(admission) => admission,
        Err(e) => {
            reject(&mut socket, &e).await;
            return;
        }
    };

    let connection = admission.connection;
    let connection_start = Instant::now();
    WsMetrics::record_opened();

    tracing::info!(connection_id = %connection.id, "WebSocket connection established");

    let (ws_sender, ws_receiver) = socket.split();

    let mut writer = tokio::spawn(write_loop(
        ws_sender,
        admission.outbound,
        connection.clone(),
    ));
    let mut reader = tokio::spawn(read_loop(ws_receiver, state.clone(), connection.clone()));

    let mut writer_done = false;
    let reason = tokio::select! {
        result = &mut reader => result.unwrap_or(CloseReason::TransportError),
        _ = &mut writer => {
            writer_done = true;
            CloseReason::TransportError
        }
        _ = connection.closed() => connection.close_reason().unwrap_or(CloseReason::Admin),
    };

    state.hub.on_disconnect(&connection, reason);

    if !writer_done && tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    reader.abort();

    // The first recorded reason wins over whatever this handler observed
    let reason = connection.close_reason().unwrap_or(reason);
    let duration = connection_start.elapsed().as_secs_f64();
    WsMetrics::record_closed(reason, duration);

    tracing::info!(
        connection_id = %connection.id,
        reason = reason.as_str(),
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Close a socket whose admission failed. The connection was never registered.
async fn reject(socket: &mut WebSocket, error: &HubError) {
    let reason = error.close_reason();
    WsMetrics::record_rejected(reason);
    tracing::warn!(error = %error, close_code = reason.close_code(), "WebSocket connection rejected");

    if let Err(e) = socket.send(close_frame(reason)).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Drain the outbound queue into the socket until the connection closes
async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    connection: Arc<Connection>,
) {
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let text = match message.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                };
                let is_heartbeat =
                    matches!(message, OutboundMessage::Control(ServerMessage::Heartbeat));
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
                // Listen-only clients never send anything; the pong they owe a
                // protocol ping is what keeps them from going stale
                if is_heartbeat && ws_sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
            _ = connection.closed() => break,
        }
    }

    // Client-initiated closes are answered by the protocol layer itself
    match connection.close_reason() {
        Some(CloseReason::ClientClosed | CloseReason::TransportError) | None => {}
        Some(reason) => {
            if let Err(e) = ws_sender.send(close_frame(reason)).await {
                tracing::debug!(connection_id = %connection.id, error = %e, "Failed to send close frame");
            }
        }
    }
}

/// Read frames until the client goes away, returning why it went away
async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: AppState,
    connection: Arc<Connection>,
) -> CloseReason {
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(frame)) => {
                tracing::debug!(connection_id = %connection.id, ?frame, "Received close frame");
                return CloseReason::ClientClosed;
            }
            Ok(message) => process_message(message, &state, &connection),
            Err(e) => {
                tracing::warn!(connection_id = %connection.id, error = %e, "WebSocket receive error");
                return CloseReason::TransportError;
            }
        }
    }
    CloseReason::ClientClosed
}

/// Every inbound frame is a liveness signal; text frames may also carry a
/// control request.
fn process_message(message: Message, state: &AppState, connection: &Arc<Connection>) {
    match message {
        Message::Text(text) => {
            state.hub.on_client_message(connection, text.as_str());

            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(request) => handle_client_message(request, state, connection),
                Err(e) => {
                    WsMessageMetrics::record_other();
                    tracing::debug!(connection_id = %connection.id, error = %e, "Unrecognized client frame");
                    state.dispatcher.send_control(
                        connection,
                        ServerMessage::error("INVALID_MESSAGE", e.to_string()),
                    );
                }
            }
        }
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {
            WsMessageMetrics::record_other();
            state.hub.on_client_message(connection, "");
        }
        Message::Close(_) => {}
    }
}

#[tracing::instrument(
    name = "ws.message",
    skip(state, connection),
    fields(connection_id = %connection.id, message_type = ?request)
)]
fn handle_client_message(request: ClientMessage, state: &AppState, connection: &Arc<Connection>) {
    match request {
        ClientMessage::Subscribe { topics } => {
            WsMessageMetrics::record_subscribe();
            handle_subscribe(topics, state, connection);
        }
        ClientMessage::Unsubscribe { topics } => {
            WsMessageMetrics::record_unsubscribe();
            handle_unsubscribe(topics, state, connection);
        }
        ClientMessage::Ping => {
            WsMessageMetrics::record_ping();
            state.dispatcher.send_control(connection, ServerMessage::Pong);
        }
    }
}

fn handle_subscribe(topics: Vec<String>, state: &AppState, connection: &Arc<Connection>) {
    let mut subscribed = Vec::new();
    let mut errors = Vec::new();

    for topic in topics {
        if !is_valid_topic(&topic) {
            errors.push(format!("Invalid topic: {}", topic));
            continue;
        }

        match state.hub.subscribe(connection, &topic) {
            Ok(_) => subscribed.push(topic),
            Err(HubError::NotOpen(_)) => return,
            Err(e) => {
                tracing::warn!(connection_id = %connection.id, topic = %topic, error = %e, "Subscribe failed");
                errors.push(e.to_string());
            }
        }
    }

    if !subscribed.is_empty() {
        tracing::info!(connection_id = %connection.id, topics = ?subscribed, "Subscribed to topics");
        state
            .dispatcher
            .send_control(connection, ServerMessage::subscribed(subscribed));
    }

    if !errors.is_empty() {
        state.dispatcher.send_control(
            connection,
            ServerMessage::error("SUBSCRIPTION_ERROR", errors.join("; ")),
        );
    }
}

fn handle_unsubscribe(topics: Vec<String>, state: &AppState, connection: &Arc<Connection>) {
    for topic in &topics {
        state.hub.unsubscribe(connection, topic);
    }

    if !topics.is_empty() {
        tracing::info!(connection_id = %connection.id, topics = ?topics, "Unsubscribed from topics");
        state
            .dispatcher
            .send_control(connection, ServerMessage::unsubscribed(topics));
    }
}

/// Topic ids: 1 to 64 characters of ASCII alphanumerics, `-`, `_` or `.`
pub fn is_valid_topic(topic: &str) -> bool {
    if topic.is_empty() || topic.len() > 64 {
        return false;
    }

    topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
