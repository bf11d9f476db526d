//! Peer registry
//!
//! Every accepted WebSocket connection is a peer with its own outbound
//! queue. The registry is shared by all connection tasks: they register on
//! connect, remove themselves on disconnect, and fan out inbound frames to
//! everyone else.
//!
//! Queues are unbounded. A peer that reads slower than others write simply
//! buffers; frames to an open peer are never discarded.

use axum::extract::ws::Message;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

pub type PeerId = Uuid;

/// Result of fanning one frame out to the other peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Frames queued for delivery
    pub delivered: u64,
    /// Frames not queued because the peer went away mid-broadcast
    pub dropped: u64,
}

/// Shared set of connected peers.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<Message>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new peer, returning its id and the receiving end of its
    /// outbound queue.
    pub async fn register(&self) -> (PeerId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.peers.write().await.insert(id, tx);
        (id, rx)
    }

    /// Remove a peer. Returns false if it was already gone.
    pub async fn remove(&self, id: PeerId) -> bool {
        self.peers.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Queue `frame` for every open peer except `from`.
    ///
    /// Never waits on a slow peer. Peers whose receiving side is already
    /// gone are skipped.
    pub async fn broadcast(&self, from: PeerId, frame: Message) -> BroadcastOutcome {
        let peers = self.peers.read().await;
        let mut outcome = BroadcastOutcome::default();

        for (id, tx) in peers.iter() {
            if *id == from || tx.is_closed() {
                continue;
            }
            match tx.send(frame.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(_) => {
                    debug!(peer = %id, "Peer left during broadcast");
                    outcome.dropped += 1;
                }
            }
        }

        outcome
    }

    /// Drop every peer's queue so their connection tasks wind down.
    pub async fn close_all(&self) -> usize {
        let mut peers = self.peers.write().await;
        let count = peers.len();
        peers.clear();
        count
    }
}
