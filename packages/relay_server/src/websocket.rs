use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::RelayState;

/// Drive one peer connection until either side closes it.
///
/// Inbound text and binary frames are fanned out verbatim to every other
/// peer. Outbound frames come from this peer's queue in the shared set.
pub async fn handle_peer(socket: WebSocket, state: RelayState) {
    let (peer_id, mut outbound) = state.peers.register().await;
    state.metrics.peer_connected();
    info!(peer = %peer_id, "New client connected");

    let (mut sender, mut receiver) = socket.split();

    let send_task = async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    };

    let recv_state = state.clone();
    let recv_task = async move {
        while let Some(msg) = receiver.next().await {
            let frame = match msg {
                Ok(Message::Text(text)) => {
                    info!(peer = %peer_id, "Received: {}", text.as_str());
                    Message::Text(text)
                }
                Ok(Message::Binary(data)) => {
                    debug!(peer = %peer_id, bytes = data.len(), "Received binary frame");
                    Message::Binary(data)
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(peer = %peer_id, "WebSocket error: {}", e);
                    recv_state.metrics.socket_error();
                    break;
                }
            };
            let outcome = recv_state.peers.broadcast(peer_id, frame).await;
            recv_state.metrics.frame_relayed(outcome);
        }
    };

    tokio::select! {
        _ = send_task => {
            debug!(peer = %peer_id, "Outbound side ended");
        }
        _ = recv_task => {
            debug!(peer = %peer_id, "Inbound side ended");
        }
    }

    state.peers.remove(peer_id).await;
    state.metrics.peer_disconnected();
    info!(peer = %peer_id, "Client disconnected");
}
