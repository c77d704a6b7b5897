use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Channel registration: one verify, then the channel lives in the
/// registry under its role scope until it closes or errors.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let scope = state.auth.verify(&query.token).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, scope)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, scope: crate::auth::Principal) {
    let (channel_id, mut outbox_rx) = state.registry.register(scope);
    state
        .metrics
        .live_connections
        .with_label_values(&[scope.role_label()])
        .inc();
    info!(channel_id = %channel_id, role = scope.role_label(), "realtime channel connected");

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = outbox_rx.recv().await {
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Clients only listen; drain until the peer goes away.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    // The router may already have evicted us; only adjust the gauge when
    // this task does the removal.
    if state.registry.deregister(channel_id).is_some() {
        state
            .metrics
            .live_connections
            .with_label_values(&[scope.role_label()])
            .dec();
    }
    info!(channel_id = %channel_id, role = scope.role_label(), "realtime channel disconnected");
}
