//! WebSocket client for the broadcast relay.
//!
//! One `RelayClient` owns at most one connection. The socket lives in a
//! spawned task; `send` hands frames to that task over a channel and never
//! waits on the network. Connection state is published on a shared `watch`
//! channel owned by the caller so observers survive client replacement.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::message::{Message, MessageLog};

/// Control frame sent when a peer starts typing. Never shown as chat content.
pub const TYPING_START: &str = "TYPING_START";
/// Control frame sent when a peer stops typing. Never shown as chat content.
pub const TYPING_END: &str = "TYPING_END";

/// How long a close handshake may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames that may wait for the socket before `send` starts refusing them.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Build the relay URL, choosing the secure scheme when the hosting context is secure.
pub fn relay_url(endpoint: &str, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    format!("{scheme}://{}", endpoint.trim_start_matches('/'))
}

/// True for frames that carry typing signals rather than chat text.
pub fn is_control_frame(text: &str) -> bool {
    text == TYPING_START || text == TYPING_END
}

struct Connection {
    cancel: CancellationToken,
    outbound: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

pub struct RelayClient {
    log: Arc<MessageLog>,
    state: Arc<watch::Sender<ConnectionState>>,
    connection: Option<Connection>,
}

impl RelayClient {
    pub fn new(log: Arc<MessageLog>, state: Arc<watch::Sender<ConnectionState>>) -> Self {
        Self {
            log,
            state,
            connection: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Open a connection to `endpoint`.
    ///
    /// Returns once the attempt is under way; the state moves to
    /// `Connected` when the handshake completes or back to `Disconnected`
    /// if it fails. Already connected is a no-op, and a pending attempt is
    /// abandoned in favour of the new one.
    pub async fn connect(&mut self, endpoint: &str, secure: bool) {
        if self.state() == ConnectionState::Connected && self.connection.is_some() {
            debug!("Relay already connected, ignoring connect");
            return;
        }
        self.disconnect().await;

        let url = relay_url(endpoint, secure);
        info!("Connecting to relay at {}", url);
        self.state.send_replace(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let task = tokio::spawn(run_connection(
            url,
            self.log.clone(),
            self.state.clone(),
            cancel.clone(),
            outbound_rx,
        ));
        self.connection = Some(Connection {
            cancel,
            outbound,
            task,
        });
    }

    /// Close the connection if any. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.cancel.cancel();
            if let Err(e) = conn.task.await {
                warn!("Relay connection task ended abnormally: {}", e);
            }
            info!("Disconnected from relay");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Queue one text frame. Fire-and-forget: no acknowledgment is awaited.
    ///
    /// Refused with `Backlogged` once `OUTBOUND_QUEUE_CAPACITY` frames are
    /// waiting on a stalled socket.
    pub fn send(&self, text: &str) -> Result<(), RelayError> {
        if self.state() != ConnectionState::Connected {
            return Err(RelayError::NotConnected);
        }
        let conn = self.connection.as_ref().ok_or(RelayError::NotConnected)?;
        conn.outbound
            .try_send(text.to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RelayError::Backlogged,
                mpsc::error::TrySendError::Closed(_) => RelayError::NotConnected,
            })
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        // The task may not observe the cancel before its next state write;
        // publish() makes that write lose to this one.
        if let Some(conn) = self.connection.take() {
            conn.cancel.cancel();
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }
}

/// Publish `next` unless the connection has been cancelled.
///
/// The check runs under the watch lock, so a canceller that writes the
/// state after cancelling always has the last word.
fn publish(
    state: &watch::Sender<ConnectionState>,
    cancel: &CancellationToken,
    next: ConnectionState,
) {
    state.send_if_modified(|current| {
        if cancel.is_cancelled() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

async fn run_connection(
    url: String,
    log: Arc<MessageLog>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    mut outbound: mpsc::Receiver<String>,
) {
    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio_tungstenite::connect_async(url.as_str()) => {
            match result {
                Ok((ws_stream, _)) => ws_stream,
                Err(e) => {
                    let err = RelayError::from_tungstenite(e);
                    warn!("Relay handshake with {} failed: {}", url, err);
                    publish(&state, &cancel, ConnectionState::Disconnected);
                    return;
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    info!("Connected to relay at {}", url);
    publish(&state, &cancel, ConnectionState::Connected);

    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_write.close()).await;
                break;
            }

            Some(text) = outbound.recv() => {
                if let Err(e) = ws_write.send(WsMessage::Text(text.into())).await {
                    warn!("Relay send failed: {}", RelayError::from_tungstenite(e));
                    break;
                }
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => accept_frame(&log, text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => {
                        accept_frame(&log, &String::from_utf8_lossy(&data));
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Relay connection lost: {}", RelayError::from_tungstenite(e));
                        break;
                    }
                }
            }
        }
    }

    // A cancelled task leaves state to whoever cancelled it, which may
    // already have started a new connection.
    publish(&state, &cancel, ConnectionState::Disconnected);
}

fn accept_frame(log: &MessageLog, text: &str) {
    if is_control_frame(text) {
        debug!("Consumed control frame {}", text);
        return;
    }
    log.push(Message::received(text));
}
