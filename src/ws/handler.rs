//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::http::middleware::verify_jwt;
use crate::session::{ConnectionHandle, MatchSessionManager, SessionError};
use crate::store::UserId;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Outbound queue depth per connection
const OUTBOUND_CAPACITY: usize = 64;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Identity token
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify identity before upgrading
    let claims = match verify_jwt(&query.token, &state.config.auth_jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            error!(error = %e, "WebSocket auth failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    if let Err(e) = state
        .profiles
        .ensure_profile(claims.sub, claims.name.as_deref())
        .await
    {
        error!(user_id = %claims.sub, error = %e, "Profile lookup failed during upgrade");
        return (StatusCode::INTERNAL_SERVER_ERROR, "server_error").into_response();
    }

    info!(user_id = %claims.sub, "WebSocket upgrade for authenticated user");
    ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: UserId, state: AppState) {
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let (handle, mut outbound_rx) = ConnectionHandle::channel(user_id, OUTBOUND_CAPACITY);

    // Writer task: outbound queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = PlayerRateLimiter::new(state.config.ws_input_rate_limit);
    let sessions = state.sessions.clone();

    // Reader loop: WebSocket -> session manager
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(user_id = %user_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => dispatch(&sessions, &handle, client_msg).await,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        handle.notify(ServerMsg::fail("invalid_request"));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(user_id = %user_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(user_id = %user_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    sessions.disconnect(&handle);
    drop(handle);
    writer_handle.abort();

    info!(user_id = %user_id, "WebSocket connection closed");
}

/// Route one inbound event; failures go back to the caller as `fail`
async fn dispatch(sessions: &MatchSessionManager, caller: &ConnectionHandle, msg: ClientMsg) {
    let result = match msg {
        ClientMsg::ConfirmPresence { room_id } => sessions.confirm_presence(caller, room_id).await,
        ClientMsg::Shoot { angle, power } => sessions.shoot(caller, angle, power).await,
        ClientMsg::SendPosition { balls } => sessions.send_position(caller, balls).await,
        ClientMsg::EndMatch { winner_id } => sessions.end_match(caller, winner_id).await,
        ClientMsg::Ping { t } => {
            caller.notify(ServerMsg::Pong { t });
            Ok(())
        }
    };

    if let Err(e) = result {
        report_failure(caller, &e);
    }
}

fn report_failure(caller: &ConnectionHandle, err: &SessionError) {
    if err.is_internal() {
        error!(user_id = %caller.user_id(), error = %err, "Session operation failed");
    } else {
        debug!(user_id = %caller.user_id(), error = %err, "Session operation rejected");
    }
    caller.notify(ServerMsg::fail(err.code()));
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::session::ConnectionRegistry;
    use crate::store::{MemoryProfileStore, MemoryRoomStore, UserProfile};

    fn sessions() -> MatchSessionManager {
        let profiles = Arc::new(MemoryProfileStore::new());
        profiles.insert(UserProfile::new(1, "alice"));
        profiles.insert(UserProfile::new(2, "bob"));
        MatchSessionManager::new(
            Arc::new(MemoryRoomStore::new()),
            profiles,
            Arc::new(ConnectionRegistry::new()),
        )
    }

    #[tokio::test]
    async fn failures_are_reported_to_caller() {
        let sessions = sessions();
        let (caller, mut rx) = ConnectionHandle::channel(1, 8);

        dispatch(&sessions, &caller, ClientMsg::Shoot { angle: 370.0, power: 50.0 }).await;
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::fail("invalid_request"));

        dispatch(&sessions, &caller, ClientMsg::ConfirmPresence { room_id: 5 }).await;
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::fail("room_not_found"));

        dispatch(&sessions, &caller, ClientMsg::SendPosition { balls: Vec::new() }).await;
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::fail("invalid_request"));
    }

    #[tokio::test]
    async fn ping_is_answered() {
        let sessions = sessions();
        let (caller, mut rx) = ConnectionHandle::channel(1, 8);
        dispatch(&sessions, &caller, ClientMsg::Ping { t: 42 }).await;
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::Pong { t: 42 });
    }

    #[tokio::test]
    async fn replies_to_a_full_queue_are_dropped() {
        let sessions = sessions();
        let (caller, mut rx) = ConnectionHandle::channel(1, 1);
        dispatch(&sessions, &caller, ClientMsg::Ping { t: 1 }).await;
        dispatch(&sessions, &caller, ClientMsg::Ping { t: 2 }).await;

        assert_eq!(rx.try_recv().unwrap(), ServerMsg::Pong { t: 1 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn confirm_presence_acknowledges_seat_one() {
        let sessions = sessions();
        let room_id = sessions.create_room(1).await.unwrap();
        let (caller, mut rx) = ConnectionHandle::channel(1, 8);

        dispatch(&sessions, &caller, ClientMsg::ConfirmPresence { room_id }).await;
        assert_eq!(rx.try_recv().unwrap(), ServerMsg::PresenceConfirmed { room_id });
        assert!(sessions.connections().get(1).is_some());
    }
}
