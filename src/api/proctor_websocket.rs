use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::proctor::{OutboundEvent, ProctorServer, ProctorSignalingHandler, OUTBOUND_QUEUE_CAPACITY};

pub const REASON_CLIENT_DISCONNECT: &str = "client disconnect";
pub const REASON_TRANSPORT_ERROR: &str = "transport error";

/// Drives one WebSocket: outbound events go through a writer task,
/// inbound text frames are dispatched in arrival order.
pub async fn handle_proctor_websocket(websocket: WebSocket, server: Arc<ProctorServer>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(OUTBOUND_QUEUE_CAPACITY);

    let signaling_handler = ProctorSignalingHandler::new(server, tx).await;
    let connection_id = signaling_handler.connection_id().to_string();
    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let writer_id = connection_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(
                        connection_id = %writer_id,
                        event = %event.event,
                        error = %e,
                        "Failed to serialize outbound event"
                    );
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::error!(connection_id = %writer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    let mut reason = REASON_CLIENT_DISCONNECT;
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_websocket_message(&signaling_handler, message).await;
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                reason = REASON_TRANSPORT_ERROR;
                break;
            }
        }
    }

    signaling_handler.cleanup(reason).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, reason, "WebSocket connection closed");
}

async fn handle_websocket_message(signaling_handler: &ProctorSignalingHandler, message: Message) {
    // Pings are answered by warp, binary frames carry nothing we understand
    if let Ok(text) = message.to_str() {
        tracing::trace!(connection_id = %signaling_handler.connection_id(), raw_message = %text, "Received message");
        signaling_handler.handle_text(text).await;
    }
}
