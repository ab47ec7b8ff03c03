//! WebSocket push of completed metrics cycles
//!
//! Provides `/ws/metrics`. Every cycle event is forwarded as JSON:
//! ```json
//! { "type": "cycle", "cycle_id": "...", "timestamp": "...", "rows": [...], "alerts": [...] }
//! ```
//! A client that falls behind the broadcast buffer gets `{"type":"lagged","missed":n}`
//! and continues from the newest event.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::models::api::CycleEvent;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsMessage {
    Cycle(CycleEvent),
    Lagged { missed: u64 },
}

/// GET /ws/metrics
pub async fn metrics_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(e) => {
            error!("Failed to serialize metrics event: {}", e);
            Ok(())
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.pipeline.subscribe();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    info!("New metrics WebSocket connection");

    loop {
        tokio::select! {
            result = events.recv() => {
                let msg = match result {
                    Ok(event) => WsMessage::Cycle(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Metrics WebSocket client missed {} events", missed);
                        WsMessage::Lagged { missed }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Metrics broadcast channel closed");
                        break;
                    }
                };
                if let Err(e) = send_json(&mut sender, &msg).await {
                    debug!("WebSocket send error: {}", e);
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if let Err(e) = sender.send(Message::Ping(axum::body::Bytes::new())).await {
                    debug!("Heartbeat failed: {}", e);
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Metrics WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket receive error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Metrics WebSocket connection closed");
}
