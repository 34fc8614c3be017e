//! Client Broadcast Hub
//!
//! Every downstream WebSocket holds its own subscription to the backend frame
//! broadcast; subscribing is registration and dropping the receiver on
//! disconnect is deregistration. Inbound client text goes to the backend
//! verbatim.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::backend_link::BackendHandle;
use crate::metrics::RelayMetrics;
use crate::protocol::{self, BACKEND_UNAVAILABLE};

#[derive(Clone)]
pub struct Hub {
    frames: broadcast::Sender<String>,
    backend: BackendHandle,
    metrics: Arc<RelayMetrics>,
    send_channel_capacity: usize,
}

impl Hub {
    pub fn new(
        frames: broadcast::Sender<String>,
        backend: BackendHandle,
        metrics: Arc<RelayMetrics>,
        send_channel_capacity: usize,
    ) -> Self {
        Self {
            frames,
            backend,
            metrics,
            send_channel_capacity,
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.frames.receiver_count()
    }

    /// Serve one downstream connection until either side closes it.
    pub async fn handle_socket(self, socket: WebSocket) {
        let client_id = Uuid::new_v4();
        let mut frames_rx = self.frames.subscribe();
        self.metrics.connection_opened();
        info!(client = %client_id, clients = self.connected_clients(), "Client connected");

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(self.send_channel_capacity);

        // Backend frames → this client
        let tx_frames = tx.clone();
        let metrics = self.metrics.clone();
        let broadcast_task = async move {
            loop {
                match frames_rx.recv().await {
                    Ok(frame) => {
                        if tx_frames.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        metrics.messages_dropped(n);
                        warn!(client = %client_id, "Client lagged, skipped {} frames", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        // Outbound queue → socket
        let metrics = self.metrics.clone();
        let sender_task = async move {
            while let Some(frame) = rx.recv().await {
                if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
                metrics.message_sent();
            }
        };

        // Socket → backend
        let backend = self.backend.clone();
        let metrics = self.metrics.clone();
        let input_task = async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        metrics.message_received();
                        if let Err(e) = backend.send(text.as_str().to_owned()).await {
                            metrics.message_rejected();
                            debug!(client = %client_id, "Message not forwarded: {}", e);
                            match protocol::error_frame(BACKEND_UNAVAILABLE) {
                                Ok(frame) => {
                                    if tx.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => error!("Failed to serialize error frame: {}", e),
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(client = %client_id, "WebSocket error: {}", e);
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = broadcast_task => {}
            _ = sender_task => {}
            _ = input_task => {}
        }

        self.metrics.connection_closed();
        info!(client = %client_id, "Client disconnected");
    }
}

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.handle_socket(socket))
}
