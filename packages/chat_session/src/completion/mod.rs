//! Streaming chat completions.
//!
//! [`CompletionBackend`] is the seam between the session controller and the
//! remote service: it takes a role-tagged transcript and yields text chunks.
//! [`CompletionClient`] is the HTTP implementation.

mod client;
mod sse;

pub use client::{CompletionClient, DEFAULT_BASE_URL};
pub use sse::chunk_stream;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::CompletionError;
use crate::message::{Direction, Message};

pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for Turn {
    fn from(message: &Message) -> Self {
        let role = match message.direction {
            Direction::Sent => Role::User,
            Direction::Received => Role::Assistant,
        };
        Self {
            role,
            content: message.content.clone(),
        }
    }
}

/// Map a conversation to the transcript the service expects.
pub fn transcript(messages: &[Message]) -> Vec<Turn> {
    messages.iter().map(Turn::from).collect()
}

/// Passed through to the service without local validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Finite, non-restartable sequence of non-empty text fragments.
pub type ChunkStream = BoxStream<'static, Result<String, CompletionError>>;

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Open a streaming completion for `transcript`.
    ///
    /// Fails up front when the request is rejected; the returned stream may
    /// still fail part way through.
    async fn stream_completion(
        &self,
        transcript: Vec<Turn>,
        settings: &CompletionSettings,
    ) -> Result<ChunkStream, CompletionError>;
}
