// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-channel WebSocket fan-out (spec §4.8): every bus publication is
//! forwarded to every connected client as a JSON text frame. Connections
//! are independent — each owns its own `broadcast::Receiver` and task, so
//! one client's slow or closed socket never blocks delivery to another.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::app::AppState;
use crate::bus::Message;

/// `GET /ws` — upgrade to the push channel.
pub async fn ws_handler(State(app): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(app, socket))
}

async fn handle_socket(app: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    app.metrics.write().await.record_ws_connect();

    let snapshot = app.state.snapshot().await;
    let data = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
    let initial = Message::State { timestamp: app.bus.next_timestamp(), data };
    if let Ok(json) = serde_json::to_string(&initial) {
        if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
            app.metrics.write().await.record_ws_disconnect();
            return;
        }
    }

    let mut rx = app.bus.subscribe();
    loop {
        tokio::select! {
            message = rx.recv() => {
                let message = match message {
                    Ok(m) => m,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let is_shutdown = matches!(message, Message::Shutdown { .. });
                let Ok(json) = serde_json::to_string(&message) else { continue };
                let sent = tokio::time::timeout(
                    std::time::Duration::from_secs(1),
                    ws_tx.send(WsMessage::Text(json.into())),
                )
                .await;
                if is_shutdown {
                    // Bounded close per connection: the server is going down
                    // regardless of whether the send above landed.
                    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), ws_tx.close()).await;
                    break;
                }
                if !matches!(sent, Ok(Ok(()))) {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        app.metrics.write().await.record_ws_message();
                        if let Some(reply) = handle_client_command(&app, &text).await {
                            if ws_tx.send(WsMessage::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    app.metrics.write().await.record_ws_disconnect();
}

/// Advisory client commands; anything unrecognized is silently ignored.
async fn handle_client_command(app: &AppState, text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(|v| v.as_str())? {
        "state_at_time" => {
            let timestamp = value.get("timestamp").and_then(|v| v.as_i64())?;
            let replay = app.state.event_buffer.read().await.state_at_time(timestamp);
            serde_json::to_string(&serde_json::json!({
                "type": "timeline:state",
                "data": replay,
            }))
            .ok()
        }
        "timeline_bounds" => {
            let bounds = app.state.event_buffer.read().await.timeline_bounds();
            serde_json::to_string(&serde_json::json!({ "type": "timeline:bounds", "data": bounds })).ok()
        }
        _ => None,
    }
}
