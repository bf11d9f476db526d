//! Relay metrics for observability
//!
//! Counters are updated by the connection tasks and read by the
//! `/health` and `/metrics` endpoints.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::peers::BroadcastOutcome;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Currently connected peers
    pub active_peers: AtomicU64,
    /// Peers accepted since start
    pub total_peers: AtomicU64,
    /// Frames received from peers
    pub frames_received: AtomicU64,
    /// Frames queued to other peers
    pub frames_delivered: AtomicU64,
    /// Deliveries lost because the peer left mid-broadcast
    pub frames_dropped: AtomicU64,
    /// Socket-level errors on peer connections
    pub socket_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn peer_connected(&self) {
        self.active_peers.fetch_add(1, Ordering::Relaxed);
        self.total_peers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_disconnected(&self) {
        self.active_peers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn frame_relayed(&self, outcome: BroadcastOutcome) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(outcome.delivered, Ordering::Relaxed);
        self.frames_dropped.fetch_add(outcome.dropped, Ordering::Relaxed);
    }

    pub fn socket_error(&self) {
        self.socket_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            peers: PeerMetrics {
                active: self.active_peers.load(Ordering::Relaxed),
                total: self.total_peers.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                delivered: self.frames_delivered.load(Ordering::Relaxed),
                dropped: self.frames_dropped.load(Ordering::Relaxed),
            },
            socket_errors: self.socket_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub peers: PeerMetrics,
    pub frames: FrameMetrics,
    pub socket_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub peers: u64,
    pub uptime_secs: u64,
}
