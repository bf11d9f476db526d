//! Slash commands for the interactive chat.
//!
//! Anything that does not start with `/` is a chat line and goes to the
//! session as-is.

/// A parsed chat command. Commands are never sent to peers or the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Switch to assistant mode.
    Assistant,

    /// Switch to peer relay mode.
    Relay,

    /// Reconnect to the relay.
    Connect,

    /// Close the relay connection.
    Disconnect,

    /// Clear the conversation.
    Clear,

    /// Send a color value to relay peers.
    Color(String),

    /// Change the completion model.
    Model(String),

    /// Change the relay host used by the next connect.
    Endpoint(String),

    /// Show mode, connection and model.
    Status,

    Help,

    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Returns `None` when the input is a regular chat line.
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "assistant" | "ai" => ChatCommand::Assistant,
        "relay" | "peer" => ChatCommand::Relay,
        "connect" => ChatCommand::Connect,
        "disconnect" => ChatCommand::Disconnect,
        "clear" => ChatCommand::Clear,
        "color" | "colour" => require(argument, ChatCommand::Color, "/color requires a value"),
        "model" => require(argument, ChatCommand::Model, "/model requires a model name"),
        "endpoint" => require(argument, ChatCommand::Endpoint, "/endpoint requires a host"),
        "status" => ChatCommand::Status,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        other => ChatCommand::Invalid(format!("unknown command /{other}")),
    };
    Some(result)
}

fn require(
    argument: Option<&str>,
    build: fn(String) -> ChatCommand,
    missing: &str,
) -> ChatCommand {
    match argument {
        Some(arg) => build(arg.to_string()),
        None => ChatCommand::Invalid(missing.to_string()),
    }
}

pub fn help_text() -> &'static str {
    "\
Commands:
  /assistant          Switch to assistant mode (clears the conversation)
  /relay              Switch to peer relay mode (clears the conversation)
  /connect            Reconnect to the relay
  /disconnect         Close the relay connection
  /clear              Clear the conversation
  /color <value>      Send a color to relay peers
  /model <id>         Use a different completion model
  /endpoint <host>    Relay host for the next connect
  /status             Show mode, connection and model
  /help               Show this help
  /quit               Exit"
}
