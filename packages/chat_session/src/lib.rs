//! Chat session controller.
//!
//! A session runs in one of two modes. In assistant mode each line is sent
//! to a streaming completion service and the reply is assembled in place as
//! chunks arrive. In peer relay mode lines go over a WebSocket to a
//! broadcast relay, and frames from other peers are appended as they come.

pub mod commands;
pub mod completion;
pub mod config;
pub mod error;
pub mod message;
pub mod relay_client;
pub mod render;
pub mod session;

pub use completion::{
    ChunkStream, CompletionBackend, CompletionClient, CompletionSettings, Role, Turn,
};
pub use config::{FileConfig, SessionConfig, SessionMode, load_config};
pub use error::{CompletionError, ConfigError, RelayError};
pub use message::{Direction, EntryHandle, Message, MessageLog};
pub use relay_client::{ConnectionState, RelayClient, TYPING_END, TYPING_START};
pub use session::SessionController;
