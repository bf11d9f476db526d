// Library interface for relay_server
// Exposes the broadcast relay for embedding in other applications and tests

pub mod metrics;
pub mod peers;
pub mod websocket;

pub use metrics::{HealthStatus, MetricsSnapshot, RelayMetrics};
pub use peers::{BroadcastOutcome, PeerId, PeerSet};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Default relay port.
pub const DEFAULT_PORT: u16 = 8080;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct RelayState {
    pub peers: Arc<PeerSet>,
    pub metrics: Arc<RelayMetrics>,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            peers: Arc::new(PeerSet::new()),
            metrics: Arc::new(RelayMetrics::new()),
        }
    }
}

/// Relay routes. Any path other than the status endpoints accepts a
/// WebSocket upgrade, so clients may connect to `host/` or `host/<path>`.
pub fn create_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/", get(relay_handler))
        .route("/{*path}", get(relay_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: RelayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let peers = state.peers.clone();
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closed = peers.close_all().await;
            info!("Closing {} peer connections", closed);
        })
        .await
}

/// Handle to a relay running in a background task.
pub struct RelayHandle {
    local_addr: SocketAddr,
    state: RelayState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RelayHandle {
    /// Bind `addr` and start relaying in the background.
    pub async fn start(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let state = RelayState::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(serve(listener, state.clone(), async move {
            let _ = shutdown_rx.await;
        }));

        info!("Relay listening on ws://{}", local_addr);

        Ok(Self {
            local_addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `host:port` form accepted by relay clients.
    pub fn endpoint(&self) -> String {
        self.local_addr.to_string()
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    /// Graceful shutdown.
    pub async fn shutdown(mut self) {
        info!("Shutting down relay");
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("Relay server error: {}", e),
            Ok(Err(e)) => warn!("Relay task failed: {}", e),
            Err(_) => {
                warn!("Relay did not stop within {:?}, aborting", SHUTDOWN_GRACE);
                self.task.abort();
            }
        }
    }
}

async fn relay_handler(State(state): State<RelayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_peer(socket, state))
}

async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let status = if snapshot.socket_errors == 0 {
        "healthy"
    } else {
        "degraded"
    };
    Json(HealthStatus {
        status: status.to_string(),
        peers: state.peers.len().await as u64,
        uptime_secs: snapshot.uptime_secs,
    })
}

async fn metrics_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
