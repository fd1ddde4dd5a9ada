//! WebSocket endpoint for live cycle updates.
//!
//! Clients connect to `/ws` and receive JSON messages of the form
//! `{"type": "...", "data": ...}` whenever the active phase changes, a
//! schedule is saved, a permission matrix is replaced, or a sub-phase moves.
//!
//! Authentication is enforced when users are configured: pass the session
//! token as a `token` query parameter (`/ws?token=<session_token>`).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::auth::session_for_token;
use crate::AppState;

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

/// Serialize an event and push it to every connected client.
///
/// Having no subscribers is not an error.
pub fn publish<T: Serialize>(tx: &broadcast::Sender<String>, kind: &str, data: &T) {
    let msg = serde_json::json!({
        "type": kind,
        "data": data,
    });
    if tx.send(msg.to_string()).is_err() {
        debug!(kind, "no WebSocket subscribers for event");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, axum::http::StatusCode> {
    if state.config.web.auth_enabled() {
        let token = query.token.ok_or(axum::http::StatusCode::UNAUTHORIZED)?;
        if session_for_token(&state, &token).await.is_none() {
            return Err(axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    let rx = state.ws_broadcast.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx)))
}

async fn handle_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    debug!("WebSocket client connected");

    let welcome = serde_json::json!({
        "type": "connected",
        "message": "Olimpiada live updates",
    });
    if let Err(e) = socket.send(Message::Text(welcome.to_string())).await {
        warn!("failed to send welcome message: {}", e);
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Err(e) = socket.send(Message::Text(msg)).await {
                            debug!("WebSocket send error (client disconnected?): {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} messages", n);
                        // The client should refetch its views.
                        let lag_msg = serde_json::json!({
                            "type": "resync",
                            "message": format!("lagged by {} messages", n),
                        });
                        let _ = socket.send(Message::Text(lag_msg.to_string())).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("broadcast channel closed, disconnecting WebSocket");
                        break;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            debug!("WebSocket pong error: {}", e);
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket receive error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    debug!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_wraps_event() {
        let (tx, mut rx) = broadcast::channel(4);
        publish(&tx, "sub_phase_changed", &serde_json::json!({ "id": 3 }));
        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "sub_phase_changed");
        assert_eq!(msg["data"]["id"], 3);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let (tx, _) = broadcast::channel::<String>(4);
        publish(&tx, "phase_changed", &"FINAL");
    }
}
