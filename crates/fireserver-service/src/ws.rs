//! WebSocket handler for realtime `flame_update` events.
//!
//! `GET /api/ws?device_id=<id>` follows one device; without the parameter
//! the session follows every device. Each session first receives the current
//! state, then every later update in publish order.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use fireserver_core::{Topic, validate_device_id};

use crate::api::AppError;
use crate::state::{AppState, FlameEvent};

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Deserialize, Default)]
pub struct WsParams {
    pub device_id: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let topic = match params.device_id.as_deref() {
        Some(id) => match validate_device_id(id) {
            Ok(id) => Topic::Device(id.to_string()),
            Err(e) => return AppError::BadRequest(e.to_string()).into_response(),
        },
        None => Topic::All,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, topic))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, topic: Topic) {
    let (mut sender, mut receiver) = socket.split();

    // The subscription is created with the current state queued in front of
    // it, so the first frames are the snapshot.
    let mut subscription = state.core.subscribe(topic).await;
    let id = subscription.id();

    info!(subscriber = id, topic = ?subscription.topic(), "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(update) = subscription.recv().await {
            let json = match serde_json::to_string(&FlameEvent::from(update)) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        if subscription.is_closed() {
            info!(subscriber = subscription.id(), "Subscription closed by hub, closing WebSocket");
            let _ = sender.send(Message::Close(None)).await;
        }
    });

    // Client messages are only read to notice the close; pings are answered
    // by axum.
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    info!(subscriber = id, "WebSocket client disconnected");
}
