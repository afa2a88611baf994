//! WebSocket handler for real-time engine events.
//!
//! Each client first receives a `snapshot` message with the connection
//! status, the last reading and the device intents, then every
//! [`EngineEvent`] as it happens. Clients that fall behind skip events.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use greenhouse_core::{ConnectionStatus, Engine, EngineEvent};
use greenhouse_types::{DeviceState, Reading};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// First message sent to every client.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "snapshot")]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub reading: Reading,
    pub devices: DeviceState,
}

impl Snapshot {
    pub fn of(engine: &Engine) -> Self {
        Self {
            status: engine.connection_status(),
            reading: engine.reading(),
            devices: engine.devices(),
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing published in between is lost.
    let mut rx = state.engine.subscribe();
    let shutdown = state.engine.shutdown_token();

    info!("WebSocket client connected");

    match serde_json::to_string(&Snapshot::of(&state.engine)) {
        Ok(json) => {
            if sender.send(Message::Text(json.into())).await.is_err() {
                info!("WebSocket client disconnected during initial snapshot");
                return;
            }
        }
        Err(e) => warn!("Failed to serialize snapshot: {}", e),
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => event,
            };
            let event = match event {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("WebSocket client lagged; skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(json) = encode(&event) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
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

    info!("WebSocket client disconnected");
}

fn encode(event: &EngineEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use greenhouse_core::EngineOptions;
    use greenhouse_core::mock::MockProvider;
    use greenhouse_types::{Actuator, ConnectionState};

    #[tokio::test]
    async fn test_snapshot_message() {
        let engine = Engine::new(Arc::new(MockProvider::new()), EngineOptions::simulation());
        engine.set_device("light", true);

        let json = serde_json::to_value(Snapshot::of(&engine)).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["status"]["mode"], "simulation");
        assert_eq!(json["status"]["state"], "disconnected");
        assert_eq!(json["reading"]["temperature"], 23.5);
        assert_eq!(json["devices"]["light"], true);
    }

    #[test]
    fn test_encode_events() {
        let json = encode(&EngineEvent::DeviceChanged {
            device: Actuator::Window,
            on: true,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "device_changed");
        assert_eq!(value["device"], "window");

        let json = encode(&EngineEvent::ConnectionChanged {
            from: ConnectionState::Connected,
            to: ConnectionState::Degraded,
            endpoint: Some("/dev/ttyACM0".to_string()),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "connection_changed");
        assert_eq!(value["to"], "degraded");
    }
}
