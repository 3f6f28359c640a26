//! WebSocket observer channel for the dashboard.
//!
//! Each connected socket is one observer: it receives the current snapshot
//! immediately on connect, then a full snapshot on every state change. The
//! inbound half of the socket is only watched for disconnect.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::auth;
use super::routes::AppState;
use super::types::AuthQuery;

pub async fn watch_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<AuthQuery>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let candidates = [params.token, auth::extract_bearer(&headers)];
    if !auth::token_allowed(&state.config, &candidates) {
        return (StatusCode::UNAUTHORIZED, "Invalid API token").into_response();
    }

    ws.on_upgrade(move |socket| handle_watch(socket, state))
}

async fn handle_watch(socket: WebSocket, state: Arc<AppState>) {
    let snapshot = state.store.snapshot().await;
    let watcher = state.broadcaster.subscribe(snapshot).await;
    let watcher_id = watcher.id;
    let mut rx = watcher.rx;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Pump snapshots to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            let payload = match serde_json::to_string(&serde_json::json!({ "tasks": &*snapshot })) {
                Ok(p) => p,
                Err(e) => {
                    debug!("Failed to encode snapshot for observer: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    // Drain the inbound half until the peer goes away.
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.broadcaster.unsubscribe(watcher_id).await;
    send_task.abort();
    debug!(watcher = %watcher_id, "Observer connection closed");
}
