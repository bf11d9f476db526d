use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

use relay_server::{DEFAULT_PORT, RelayState};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Broadcast relay: forwards every frame to all other connected peers")]
struct Args {
    /// Port to listen on (0 for automatic)
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(short = 'b', long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        "relay_server=debug,tower_http=debug"
    } else {
        "relay_server=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = format!("{}:{}", args.host, args.port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    // Machine-readable address first
    println!("RELAY_ADDR={}", actual_addr);
    info!("WebSocket relay running on ws://{}", actual_addr);
    info!("  GET /health  - Liveness and peer count");
    info!("  GET /metrics - Relay counters");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, closing peers...");
    };

    relay_server::serve(listener, RelayState::new(), shutdown_signal)
        .await
        .context("Relay server error")?;

    info!("Shutdown complete");
    Ok(())
}
