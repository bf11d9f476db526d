//! The session controller.
//!
//! Owns the message log and exactly one transport. Mode and connection are
//! a single tagged state: in assistant mode there is no relay client at
//! all, so a relay connection cannot outlive a switch to assistant mode.
//!
//! Mode switches always run in this order: cancel in-flight completions,
//! close the relay connection, clear the log, then either add the welcome
//! message or start a new relay connection.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::completion::{self, CompletionBackend, CompletionSettings, Turn};
use crate::config::{SessionConfig, SessionMode};
use crate::error::RelayError;
use crate::message::{Message, MessageLog};
use crate::relay_client::{ConnectionState, RelayClient};

enum Transport {
    Assistant,
    PeerRelay(RelayClient),
}

pub struct SessionController {
    log: Arc<MessageLog>,
    transport: Transport,
    backend: Arc<dyn CompletionBackend>,
    settings: CompletionSettings,
    welcome_message: String,
    endpoint: String,
    secure: bool,
    input: String,
    /// Number of completion requests still running
    in_flight: Arc<watch::Sender<usize>>,
    streams: CancellationToken,
    connection: Arc<watch::Sender<ConnectionState>>,
}

/// Counts one in-flight completion for as long as it lives.
struct LoadingGuard(Arc<watch::Sender<usize>>);

impl LoadingGuard {
    fn new(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl SessionController {
    /// Create a controller and enter the configured initial mode.
    pub async fn start(config: SessionConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (in_flight, _) = watch::channel(0);
        let mut controller = Self {
            log: Arc::new(MessageLog::new()),
            transport: Transport::Assistant,
            backend,
            settings: config.completion,
            welcome_message: config.welcome_message,
            endpoint: config.relay_endpoint,
            secure: config.secure,
            input: String::new(),
            in_flight: Arc::new(in_flight),
            streams: CancellationToken::new(),
            connection: Arc::new(connection),
        };
        controller.set_mode(config.initial_mode).await;
        controller
    }

    pub fn mode(&self) -> SessionMode {
        match self.transport {
            Transport::Assistant => SessionMode::Assistant,
            Transport::PeerRelay(_) => SessionMode::PeerRelay,
        }
    }

    /// Switch modes. Re-selecting the current mode repeats the whole
    /// transition, so the log is cleared again.
    pub async fn set_mode(&mut self, mode: SessionMode) {
        info!("Switching to {} mode", mode);
        self.cancel_completions();
        self.close_relay().await;
        self.log.clear();

        match mode {
            SessionMode::Assistant => {
                self.transport = Transport::Assistant;
                self.log.push(Message::received(self.welcome_message.as_str()));
            }
            SessionMode::PeerRelay => {
                self.input.clear();
                let mut client = RelayClient::new(self.log.clone(), self.connection.clone());
                client.connect(&self.endpoint, self.secure).await;
                self.transport = Transport::PeerRelay(client);
            }
        }
    }

    /// Route `text` to the active transport and clear the input buffer.
    ///
    /// In relay mode a send while not connected is dropped without a trace.
    pub fn send_message(&mut self, text: &str) {
        if let Transport::PeerRelay(client) = &self.transport {
            Self::relay_send(client, &self.log, text);
        } else {
            self.request_completion(text);
        }
        self.input.clear();
    }

    /// Forward a color value to the relay peers, like a chat line.
    pub fn send_color(&mut self, color: &str) {
        if let Transport::PeerRelay(client) = &self.transport {
            Self::relay_send(client, &self.log, color);
        }
    }

    fn relay_send(client: &RelayClient, log: &MessageLog, text: &str) {
        match client.send(text) {
            Ok(()) => {
                log.push(Message::sent(text));
            }
            Err(e) => debug!("Dropping relay message: {}", e),
        }
    }

    fn request_completion(&mut self, text: &str) {
        let mut transcript = completion::transcript(&self.log.snapshot());
        transcript.push(Turn::user(text));
        self.log.push(Message::sent(text));

        let epoch = self.log.epoch();
        let log = self.log.clone();
        let backend = self.backend.clone();
        let settings = self.settings.clone();
        let cancel = self.streams.child_token();
        let loading = LoadingGuard::new(self.in_flight.clone());

        tokio::spawn(async move {
            let _loading = loading;
            tokio::select! {
                _ = cancel.cancelled() => debug!("Completion abandoned"),
                _ = stream_reply(log, backend, transcript, settings, epoch) => {}
            }
        });
    }

    /// Empty the log without touching the connection.
    pub fn clear_messages(&self) {
        self.log.clear();
    }

    /// Connect to the relay. Refused in assistant mode.
    pub async fn connect(&mut self) -> Result<(), RelayError> {
        match &mut self.transport {
            Transport::Assistant => Err(RelayError::AssistantMode),
            Transport::PeerRelay(client) => {
                self.input.clear();
                client.connect(&self.endpoint, self.secure).await;
                Ok(())
            }
        }
    }

    pub async fn disconnect(&mut self) {
        self.close_relay().await;
    }

    /// Close the relay connection and abandon running completions.
    pub async fn shutdown(&mut self) {
        info!("Shutting down chat session");
        self.cancel_completions();
        self.close_relay().await;
    }

    async fn close_relay(&mut self) {
        if let Transport::PeerRelay(client) = &mut self.transport {
            client.disconnect().await;
        }
    }

    fn cancel_completions(&mut self) {
        self.streams.cancel();
        self.streams = CancellationToken::new();
    }

    /// Relay host used by the next connect.
    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = endpoint.into();
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.settings.model = model.into();
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    /// Send whatever is in the input buffer.
    pub fn submit(&mut self) {
        let text = std::mem::take(&mut self.input);
        self.send_message(&text);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.in_flight.borrow() > 0
    }

    /// Resolve once no completion is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn messages(&self) -> Vec<Message> {
        self.log.snapshot()
    }

    pub fn log(&self) -> &Arc<MessageLog> {
        &self.log
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.streams.cancel();
    }
}

/// Drive one completion into the log.
///
/// Every write is tied to the log epoch at send time, so a clear while the
/// reply is streaming leaves the log empty.
async fn stream_reply(
    log: Arc<MessageLog>,
    backend: Arc<dyn CompletionBackend>,
    transcript: Vec<Turn>,
    settings: CompletionSettings,
    epoch: u64,
) {
    let mut chunks = match backend.stream_completion(transcript, &settings).await {
        Ok(chunks) => chunks,
        Err(e) => {
            warn!("Completion request failed: {}", e);
            log.push_if_epoch(epoch, Message::received(e.user_message()));
            return;
        }
    };

    let Some(placeholder) = log.push_if_epoch(epoch, Message::received("")) else {
        debug!("Log cleared before the reply started");
        return;
    };

    let mut received = 0usize;
    while let Some(item) = chunks.next().await {
        match item {
            Ok(text) => {
                if !log.append_to(placeholder, &text) {
                    debug!("Log cleared mid-reply, discarding the rest");
                    return;
                }
                received += text.len();
            }
            Err(e) => {
                warn!("Completion stream failed after {} bytes: {}", received, e);
                log.push_if_epoch(epoch, Message::received(e.user_message()));
                return;
            }
        }
    }
    info!("Completion finished ({} bytes)", received);
}
