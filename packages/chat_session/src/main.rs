use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use chat_session::commands::{ChatCommand, help_text, parse_command};
use chat_session::config::{default_config_dir, extract_config};
use chat_session::render::LogRenderer;
use chat_session::{CompletionClient, MessageLog, SessionConfig, SessionController, SessionMode};

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Chat with relay peers or a streaming assistant")]
struct Args {
    /// Directory holding config.toml
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Relay host and optional path, e.g. 127.0.0.1:8080
    #[arg(short, long)]
    relay_host: Option<String>,

    /// Mode to start in
    #[arg(short, long, value_enum)]
    mode: Option<SessionMode>,

    /// Completion model id
    #[arg(long)]
    model: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "chat_session=debug"
    } else {
        "chat_session=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    // Chat output owns stdout
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_dir = args.config_dir.unwrap_or_else(default_config_dir);
    let mut fc = extract_config(&config_dir)
        .with_context(|| format!("Failed to load config from {:?}", config_dir))?;
    if let Some(host) = args.relay_host {
        fc.relay.host = host;
    }
    if let Some(mode) = args.mode {
        fc.session.initial_mode = mode;
    }
    if let Some(model) = args.model {
        fc.completion.model = model;
    }

    let client = CompletionClient::new(
        fc.completion.base_url.clone(),
        fc.completion.api_key.clone(),
        fc.completion.timeout(),
    )
    .context("Failed to create completion client")?;
    if fc.completion.api_key.is_none() {
        warn!("No completion API key configured; assistant replies will fail");
    }

    let mut session =
        SessionController::start(SessionConfig::from_file(&fc), Arc::new(client)).await;

    let render_task = tokio::spawn(render_loop(session.log().clone()));
    let mut connection = session.subscribe_connection();
    let status_task = tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let state = *connection.borrow_and_update();
            eprintln!("\n[relay {}]", state);
        }
    });

    println!("Type a message, or /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            None => {
                if line.trim().is_empty() {
                    continue;
                }
                session.set_input(line);
                session.submit();
            }
            Some(ChatCommand::Assistant) => session.set_mode(SessionMode::Assistant).await,
            Some(ChatCommand::Relay) => session.set_mode(SessionMode::PeerRelay).await,
            Some(ChatCommand::Connect) => {
                if let Err(e) = session.connect().await {
                    eprintln!("{}", e);
                }
            }
            Some(ChatCommand::Disconnect) => session.disconnect().await,
            Some(ChatCommand::Clear) => session.clear_messages(),
            Some(ChatCommand::Color(color)) => session.send_color(&color),
            Some(ChatCommand::Model(model)) => {
                session.set_model(model);
                eprintln!("model: {}", session.model());
            }
            Some(ChatCommand::Endpoint(endpoint)) => {
                session.set_endpoint(endpoint);
                eprintln!("relay host: {} (used on next connect)", session.endpoint());
            }
            Some(ChatCommand::Status) => {
                eprintln!(
                    "mode: {}  relay: {} ({})  model: {}  messages: {}{}",
                    session.mode(),
                    session.endpoint(),
                    session.connection_state(),
                    session.model(),
                    session.log().len(),
                    if session.is_loading() { "  [replying]" } else { "" },
                );
            }
            Some(ChatCommand::Help) => eprintln!("{}", help_text()),
            Some(ChatCommand::Quit) => break,
            Some(ChatCommand::Invalid(reason)) => eprintln!("{}", reason),
        }
    }

    session.shutdown().await;
    status_task.abort();
    render_task.abort();
    println!();
    Ok(())
}

/// Redraw whatever changed in the log each time its version moves.
async fn render_loop(log: Arc<MessageLog>) {
    let mut renderer = LogRenderer::new();
    let mut version = log.subscribe();
    loop {
        version.mark_unchanged();
        let out = renderer.render(log.epoch(), &log.snapshot());
        if !out.is_empty() {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(out.as_bytes());
            let _ = stdout.flush();
        }
        if version.changed().await.is_err() {
            break;
        }
    }
}
