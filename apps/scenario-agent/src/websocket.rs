//! Push channel for locally connected UI subscribers.
//!
//! Pure event broadcast: the server sends agent events as JSON text frames
//! and treats every inbound frame as a keepalive. A subscriber that falls
//! behind skips the lagged events rather than stalling delivery to others.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::events::LocalEventBroadcaster;
use crate::state::AppState;

pub async fn log_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.events.clone()))
}

async fn handle_socket(socket: WebSocket, events: LocalEventBroadcaster) {
    info!("UI subscriber connected to log stream");
    let (mut sender, mut receiver) = socket.split();
    let mut rx = events.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "slow log-stream subscriber; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = receiver.next() => match inbound {
                // Inbound frames carry no command semantics; treat as keepalive.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
    info!("UI subscriber disconnected from log stream");
}
