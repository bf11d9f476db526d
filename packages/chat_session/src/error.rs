//! Error types for the chat session.
//!
//! Every failure here is terminal only for the operation that raised it.
//! The session controller turns completion failures into log entries and
//! relay failures into connection state changes.

use tokio_tungstenite::tungstenite;

/// Log text shown when the completion service rejects the credentials.
pub const AUTH_FAILURE_TEXT: &str =
    "The completion service rejected the API key. Check that a valid key is configured.";

/// Log text shown when the completion service is rate limiting or out of balance.
pub const QUOTA_FAILURE_TEXT: &str =
    "The completion service is rate limiting requests or the account balance is exhausted. Please try again later.";

/// Log text shown for any other completion failure.
pub const SERVICE_FAILURE_TEXT: &str = "The completion service call failed.";

/// Failure of a streaming completion request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    /// Missing or invalid credentials
    #[error("completion service rejected the credentials: {0}")]
    Auth(String),

    /// Rate limiting or billing exhaustion
    #[error("completion service quota exhausted: {0}")]
    Quota(String),

    /// Any other remote-reported failure or transport fault
    #[error("completion service failure: {0}")]
    UnknownService(String),
}

impl CompletionError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.trim())
        };
        match status {
            401 | 403 => Self::Auth(detail),
            402 | 429 => Self::Quota(detail),
            _ => Self::UnknownService(detail),
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), ""),
            None => Self::UnknownService(err.to_string()),
        }
    }

    /// The fixed text appended to the conversation for this kind of failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Auth(_) => AUTH_FAILURE_TEXT,
            Self::Quota(_) => QUOTA_FAILURE_TEXT,
            Self::UnknownService(_) => SERVICE_FAILURE_TEXT,
        }
    }
}

/// Failure on the relay transport.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay is unavailable")]
    Unavailable,

    #[error("relay connection failed: {0}")]
    Connection(String),

    #[error("not connected to the relay")]
    NotConnected,

    #[error("relay outbound queue is full")]
    Backlogged,

    #[error("relay connections are not used in assistant mode")]
    AssistantMode,
}

impl RelayError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Connection(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Invalid(Box::new(err))
    }
}
