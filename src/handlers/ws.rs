use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::services::TransactionStatusUpdate;
use crate::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Only stream updates for this receiver.
    pub user_id: Option<String>,
}

impl WsQuery {
    fn wants(&self, update: &TransactionStatusUpdate) -> bool {
        match &self.user_id {
            Some(user_id) => update.receiver_id.as_deref() == Some(user_id.as_str()),
            None => true,
        }
    }
}

/// Upgrades to a websocket that streams transaction status changes.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let updates = state.notifier.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, updates, query))
}

async fn handle_socket(
    socket: WebSocket,
    mut updates: broadcast::Receiver<TransactionStatusUpdate>,
    query: WsQuery,
) {
    let (mut sender, mut receiver) = socket.split();
    tracing::info!(user_id = ?query.user_id, "status stream opened");

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                result = updates.recv() => match result {
                    Ok(update) if query.wants(&update) => {
                        let json = match serde_json::to_string(&update) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to serialize status update");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "status stream lagging, updates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    tracing::info!("status stream closed");
}
