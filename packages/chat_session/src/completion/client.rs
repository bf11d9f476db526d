use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as ReqwestClient;
use reqwest::header::{self, HeaderValue};
use serde::Serialize;
use tracing::{debug, warn};

use super::{ChunkStream, CompletionBackend, CompletionSettings, Turn, chunk_stream};
use crate::error::CompletionError;

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: ReqwestClient,
    base_url: String,
    api_key: Option<String>,
}

impl CompletionClient {
    /// `read_timeout` bounds the gap between bytes, not the whole stream.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        read_timeout: Duration,
    ) -> Result<Self, CompletionError> {
        let client = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| {
                CompletionError::UnknownService(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn stream_completion(
        &self,
        transcript: Vec<Turn>,
        settings: &CompletionSettings,
    ) -> Result<ChunkStream, CompletionError> {
        let Some(api_key) = &self.api_key else {
            return Err(CompletionError::Auth("no API key configured".to_string()));
        };

        let body = CompletionRequest {
            model: &settings.model,
            messages: &transcript,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            stream: true,
        };

        let url = self.endpoint();
        debug!(
            "Requesting completion from {} (model {}, {} turns)",
            url,
            settings.model,
            transcript.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&body)
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Completion request rejected with {}", status);
            return Err(CompletionError::from_status(status.as_u16(), &text));
        }

        Ok(chunk_stream(Box::pin(response.bytes_stream())).boxed())
    }
}
