use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use flowboard_common::models::TaskChange;

use super::api::{ApiError, SharedState, resolve_identity};
use super::auth::bearer_token;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Browsers cannot set headers on an upgrade request, so the token may
    /// also come as a query parameter.
    pub access_token: Option<String>,
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(params.access_token.filter(|t| !t.is_empty()));
    let Some(token) = token else {
        return ApiError::Unauthorized.into_response();
    };
    let identity = match resolve_identity(&state, &token).await {
        Ok(identity) => identity,
        Err(e) => return e.into_response(),
    };

    let rx = state.store.subscribe();
    let user_id = identity.user_id;
    ws.on_upgrade(move |socket| async move {
        tracing::debug!(user_id = %user_id, "change socket opened");
        let (sender, receiver) = socket.split();
        run_socket_loop(sender, receiver, rx, user_id).await;
    })
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards the user's task changes as JSON text frames and pings the client
/// every [`PING_INTERVAL`]. If no Pong arrives within [`PONG_TIMEOUT`] the
/// connection is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<TaskChange>,
    user_id: String,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(user_id = %user_id, "change socket timed out");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(change) if change.user_id == user_id => {
                        let Some(json) = encode_change(&change) else { continue };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "change socket lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

fn encode_change(change: &TaskChange) -> Option<String> {
    serde_json::to_string(change)
        .map_err(|e| tracing::warn!("Failed to serialize task change: {}", e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowboard_common::models::ChangeKind;
    use uuid::Uuid;

    #[test]
    fn test_change_frame_is_plain_json() {
        let change = TaskChange {
            event: ChangeKind::Delete,
            task_id: Uuid::nil(),
            user_id: "alice".into(),
        };
        let json = encode_change(&change).unwrap();
        let parsed: TaskChange = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, change);
        assert!(json.contains("\"event\":\"delete\""));
    }

    #[test]
    fn test_ws_params_token_is_optional() {
        let params: WsParams = serde_json::from_str("{}").unwrap();
        assert!(params.access_token.is_none());
    }
}
