//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::session;
use crate::error::ApiError;
use crate::store::{UserId, UserRecord};
use crate::AppState;

use super::bridge;
use super::connection_id;
use super::events::{ClientEvent, ServerEvent};
use super::rooms::Room;
use super::router::DomainEvent;

/// Close codes (4000-range for application-level).
const CLOSE_REPLACED: u16 = 4000;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

pub fn router() -> Router<AppState> {
    Router::new().route("/realtime", get(ws_upgrade))
}

/// The session credential is checked before the upgrade completes; a bad
/// handshake never becomes a WebSocket.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let cookie_header = headers.get(COOKIE).and_then(|v| v.to_str().ok());
    match session::authenticate_handshake(&state.config, state.store.as_ref(), cookie_header).await
    {
        Ok(user) => ws
            .on_upgrade(move |socket| handle_connection(socket, state, user))
            .into_response(),
        Err(err) => {
            tracing::debug!(reason = err.reason(), "realtime handshake rejected");
            ApiError::from(err).into_response()
        }
    }
}

async fn handle_connection(socket: WebSocket, state: AppState, user: UserRecord) {
    let connection_id = connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    let router = state.events.clone();
    if let Some(evicted) = router.register(user.id, &connection_id, outbound_tx) {
        tracing::debug!(
            user_id = user.id,
            evicted = %evicted,
            "user logged in elsewhere, presence entry replaced"
        );
    }
    router.join(&connection_id, Room::User(user.id));

    router.send_to_connection(
        &connection_id,
        &ServerEvent::ConnectionConfirmed {
            user_id: user.id,
            socket_id: connection_id.clone(),
            timestamp: Utc::now(),
        },
    );
    let _ = router
        .dispatch(DomainEvent::UserOnline {
            user_id: user.id,
            origin: connection_id.clone(),
        })
        .await;

    tracing::info!(
        user_id = user.id,
        connection = %connection_id,
        "realtime session established"
    );

    let reason = run_session(
        &state,
        &connection_id,
        user.id,
        &mut ws_tx,
        &mut ws_rx,
        &mut outbound_rx,
    )
    .await;

    let went_offline = router.unregister(&connection_id, user.id);
    if went_offline {
        let _ = router
            .dispatch(DomainEvent::UserOffline {
                user_id: user.id,
                reason: reason.to_string(),
                origin: connection_id.clone(),
            })
            .await;
    }

    tracing::info!(
        user_id = user.id,
        connection = %connection_id,
        reason,
        "realtime session ended"
    );
}

/// Main session loop: forward outbound frames, read client events, enforce
/// the liveness window. Returns the disconnect reason.
async fn run_session(
    state: &AppState,
    connection_id: &str,
    user_id: UserId,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    outbound_rx: &mut mpsc::UnboundedReceiver<Arc<str>>,
) -> &'static str {
    let liveness_window = state.config.liveness_window();
    let mut probe = time::interval(state.config.heartbeat_interval);
    probe.tick().await; // First tick fires immediately; skip it.
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // Frame routed to this connection by the fan-out engine.
            frame = outbound_rx.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                            return "transport error";
                        }
                    }
                    // Handle dropped from the registry: replaced by a newer login.
                    None => {
                        let _ = send_close(ws_tx, CLOSE_REPLACED, "Connection replaced").await;
                        return "connection replaced";
                    }
                }
            }

            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                handle_client_event(state, connection_id, user_id, event).await;
                            }
                            Err(e) => {
                                tracing::debug!(
                                    ?e,
                                    connection = connection_id,
                                    "ignoring unparseable client frame"
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => return "client disconnect",
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection = connection_id, "ws read error");
                        return "transport error";
                    }
                    _ => {}
                }
            }

            // Liveness probe.
            _ = probe.tick() => {
                if last_seen.elapsed() > liveness_window {
                    tracing::debug!(
                        connection = connection_id,
                        "liveness window expired, closing connection"
                    );
                    let _ = send_close(ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    return "heartbeat timeout";
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return "transport error";
                }
            }
        }
    }
}

async fn handle_client_event(
    state: &AppState,
    connection_id: &str,
    user_id: UserId,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Ping => {
            state.events.send_to_connection(
                connection_id,
                &ServerEvent::Pong {
                    timestamp: Utc::now(),
                },
            );
        }
        ClientEvent::SendMessage(payload) => {
            bridge::handle_send_message(
                state.store.as_ref(),
                &state.events,
                connection_id,
                user_id,
                payload,
            )
            .await;
        }
        ClientEvent::JoinChat(chat_id) => {
            tracing::debug!(user_id, chat_id, "joining chat room");
            state.events.join(connection_id, Room::Chat(chat_id));
        }
        ClientEvent::LeaveChat(chat_id) => {
            state.events.leave(connection_id, Room::Chat(chat_id));
        }
        ClientEvent::Typing(payload) => {
            state.events.send_to_room_except(
                Room::Chat(payload.chat_id),
                connection_id,
                &ServerEvent::UserTyping {
                    user_id,
                    chat_id: payload.chat_id,
                    is_typing: payload.is_typing,
                },
            );
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
