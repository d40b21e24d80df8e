//! WebSocket upgrade handler for player connections.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Verify the bearer token and resolve the user
//! 2. Upgrade to WebSocket and wait for the hub to apply the registration
//! 3. Queue the `connected` envelope
//! 4. Drain the send queue and dispatch client frames until either side stops
//! 5. Unregister (which also removes room membership)

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use metrics::histogram;
use serde::Deserialize;

use crate::adapters::http::ApiError;
use crate::application::TokenVerifier;
use crate::domain::foundation::{DomainError, ErrorCode, InstanceId, RoomId, UserId};
use crate::domain::realtime::{Envelope, GameEvent};

use super::{
    broadcaster::Broadcaster,
    client::Client,
    hub::Hub,
    messages::{error_reply, pong, ClientMessage},
};

/// Close code sent when the hub cannot take the connection (RFC 6455 "try again later").
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

// ════════════════════════════════════════════════════════════════════════════
// Handler state
// ════════════════════════════════════════════════════════════════════════════

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: Arc<Hub>,
    pub broadcaster: Arc<Broadcaster>,
    pub tokens: Arc<TokenVerifier>,
    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,
}

impl WebSocketState {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        tokens: Arc<TokenVerifier>,
        send_queue_capacity: usize,
    ) -> Self {
        Self {
            hub: broadcaster.hub().clone(),
            broadcaster,
            tokens,
            send_queue_capacity,
        }
    }

    fn instance_id(&self) -> &InstanceId {
        self.broadcaster.instance_id()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// Upgrade
// ════════════════════════════════════════════════════════════════════════════

/// GET /ws?token=<jwt> - Upgrade to a player connection.
///
/// The token may also be sent as `Authorization: Bearer <jwt>`. Requests
/// without a valid token are refused with 401 before the upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<WebSocketState>,
) -> Response {
    let user_id = match authenticate(&state.tokens, params.token.as_deref(), &headers) {
        Ok(user_id) => user_id,
        Err(e) => return ApiError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

fn authenticate(
    tokens: &TokenVerifier,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<UserId, DomainError> {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match query_token.filter(|t| !t.is_empty()).or(header_token) {
        Some(token) => tokens.verify(token),
        None => Err(DomainError::new(ErrorCode::Unauthorized, "missing token")),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════════════

/// Runs one established connection until it closes.
async fn handle_socket(mut socket: WebSocket, user_id: UserId, state: WebSocketState) {
    let (client, mut outbound) = Client::new(user_id, state.send_queue_capacity);

    // Frames are only read once the hub knows the connection, so a
    // `join_room` sent right after `connected` always finds it.
    if !state.hub.register_and_wait(client.clone()).await {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_TRY_AGAIN_LATER,
                reason: "server busy".into(),
            })))
            .await;
        return;
    }

    tracing::info!(client_id = %client.id(), user_id = %user_id, "Client connected");

    let connected = Envelope::to_user(
        user_id,
        GameEvent::Connected {
            client_id: client.id().to_string(),
            instance_id: state.instance_id().to_string(),
        },
    );
    state.broadcaster.deliver_to_client(&client, &connected);

    let (mut sink, mut stream) = socket.split();

    // Writer: drains the send queue in order until the client is closed.
    let writer = client.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = writer.closed() => break,
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = sink.send(Message::Text(frame.to_string())).await {
                        tracing::debug!(client_id = %writer.id(), error = %e, "Send error, closing connection");
                        break;
                    }
                }
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Reader: dispatches client frames until the peer goes away.
    let reader = client.clone();
    let reader_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = reader.closed() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    handle_client_frame(&reader_state, &reader, &text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(client_id = %reader.id(), "Received unsupported binary message");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Protocol ping/pong is answered by axum.
                }
                Some(Err(e)) => {
                    tracing::debug!(client_id = %reader.id(), error = %e, "Receive error");
                    break;
                }
            }
        }
    });

    let writer_finished = tokio::select! {
        _ = &mut send_task => true,
        _ = &mut recv_task => false,
    };
    if writer_finished {
        recv_task.abort();
    }

    state.hub.unregister(&client);
    if !writer_finished {
        let _ = send_task.await;
    }

    let session = client.connected_for();
    histogram!("ws_session_seconds").record(session.as_secs_f64());
    tracing::info!(
        client_id = %client.id(),
        user_id = %user_id,
        session_ms = session.as_millis() as u64,
        "Client disconnected"
    );
}

// ════════════════════════════════════════════════════════════════════════════
// Client frames
// ════════════════════════════════════════════════════════════════════════════

/// Handles one text frame from a connection.
///
/// Rejected frames are answered with an `error` envelope to that
/// connection only; nothing a client sends can tear down anybody else.
pub async fn handle_client_frame(state: &WebSocketState, client: &Arc<Client>, text: &str) {
    if let Err(e) = dispatch(state, client, text).await {
        tracing::debug!(
            client_id = %client.id(),
            user_id = %client.user_id(),
            code = %e.code,
            error = %e.message,
            "Rejected client frame"
        );
        state.broadcaster.deliver_to_client(client, &error_reply(&e));
    }
}

async fn dispatch(state: &WebSocketState, client: &Arc<Client>, text: &str) -> Result<(), DomainError> {
    let user_id = Some(client.user_id());

    match ClientMessage::parse(text)? {
        ClientMessage::Ping => {
            state.broadcaster.deliver_to_client(client, &pong());
        }

        ClientMessage::JoinRoom { room_id } => {
            let room_id = RoomId::new(room_id)?;
            let previous = state.hub.room_of(client.id());
            if previous.as_ref() == Some(&room_id) {
                return Ok(());
            }

            if !state.hub.join_room(client, room_id.clone()) {
                return Err(DomainError::new(
                    ErrorCode::ValidationFailed,
                    "connection is not registered yet",
                ));
            }

            if let Some(previous) = previous {
                let left = Envelope::to_room(previous, GameEvent::RoomLeft { room: None }).with_user(user_id);
                state.broadcaster.publish(&left).await;
            }
            let joined = Envelope::to_room(room_id, GameEvent::RoomJoined { room: None }).with_user(user_id);
            state.broadcaster.publish(&joined).await;
        }

        ClientMessage::LeaveRoom => {
            if let Some(previous) = state.hub.leave_room(client) {
                let left = Envelope::to_room(previous, GameEvent::RoomLeft { room: None }).with_user(user_id);
                state.broadcaster.publish(&left).await;
            }
        }

        ClientMessage::RoomMessage { data } => {
            let room_id = state.hub.room_of(client.id()).ok_or_else(|| {
                DomainError::new(ErrorCode::ValidationFailed, "join a room before sending room messages")
            })?;
            let message = Envelope::to_room(room_id, GameEvent::RoomMessage { data }).with_user(user_id);
            state.broadcaster.publish(&message).await;
        }
    }
    Ok(())
}
