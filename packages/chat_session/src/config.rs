use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::completion::{
    CompletionSettings, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
use crate::error::ConfigError;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [completion]
//                    model = "deepseek-chat"
//
//   env var:         CHAT_COMPLETION__MODEL=deepseek-chat   (double underscore = nesting)

pub const DEFAULT_RELAY_HOST: &str = "127.0.0.1:8080";
pub const DEFAULT_WELCOME_MESSAGE: &str = "Hi! Ask me anything.";

/// Which transport the session uses.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Replies stream in from the completion service
    Assistant,
    /// Messages are exchanged with other peers through the relay
    #[value(name = "relay")]
    #[serde(alias = "relay")]
    PeerRelay,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assistant => write!(f, "assistant"),
            Self::PeerRelay => write!(f, "relay"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub completion: CompletionFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Lives under `[relay]` in config.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    /// Host and optional path of the relay, without scheme
    #[serde(default = "default_relay_host")]
    pub host: String,
    /// Whether the hosting context is served over a secure channel
    #[serde(default)]
    pub secure: bool,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            secure: false,
        }
    }
}

/// Lives under `[completion]` in config.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CompletionFileConfig {
    pub fn settings(&self) -> CompletionSettings {
        CompletionSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Lives under `[session]` in config.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_initial_mode")]
    pub initial_mode: SessionMode,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            initial_mode: default_initial_mode(),
            welcome_message: default_welcome_message(),
        }
    }
}

fn default_relay_host() -> String {
    DEFAULT_RELAY_HOST.to_string()
}
fn default_base_url() -> String {
    crate::completion::DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_initial_mode() -> SessionMode {
    SessionMode::Assistant
}
fn default_welcome_message() -> String {
    DEFAULT_WELCOME_MESSAGE.to_string()
}

/// Build a figment that layers: defaults → config.toml → CHAT_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("CHAT_").split("__"))
}

pub fn extract_config(config_dir: &Path) -> Result<FileConfig, ConfigError> {
    Ok(load_config(config_dir).extract()?)
}

/// `~/.config/chat-session` or the platform equivalent.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat-session")
}

// =============================================================================
// Runtime config (what the session controller consumes)
// =============================================================================

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub relay_endpoint: String,
    pub secure: bool,
    pub completion: CompletionSettings,
    pub welcome_message: String,
    pub initial_mode: SessionMode,
}

impl SessionConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            relay_endpoint: fc.relay.host.clone(),
            secure: fc.relay.secure,
            completion: fc.completion.settings(),
            welcome_message: fc.session.welcome_message.clone(),
            initial_mode: fc.session.initial_mode,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
