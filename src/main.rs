//! Rust IRC Client - Main binary

use clap::Parser;
use rustircc_core::{Client, ClientConfig, EventKind};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Rust IRC Client - A modular multi-network IRC client
#[derive(Parser)]
#[command(name = "rustircc")]
#[command(about = "A modular multi-network IRC client in Rust")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Networks to connect to, e.g. "irc.libera.chat" or "irc://host:6667"
    #[arg(value_name = "NETWORK")]
    networks: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    // Load configuration
    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        ClientConfig::from_file(&cli.config)?
    } else {
        ClientConfig::default()
    };

    if config.networks.is_empty() && cli.networks.is_empty() {
        anyhow::bail!("no networks configured; pass one on the command line or in the config file");
    }

    let client = Client::with_throttling(config.throttling);
    rustircc_protocols::register(&client);

    // Surface inbound traffic and lifecycle events
    client.on(EventKind::Data, |event| async move {
        if let Some(message) = &event.payload {
            info!("[{}] {}", event.connection, message);
        }
        Ok(())
    });
    client.on(EventKind::Disconnect, |event| async move {
        warn!("[{}] disconnected", event.connection);
        Ok(())
    });
    client.on(EventKind::SslError, |event| async move {
        error!(
            "[{}] TLS failure: {}",
            event.connection,
            event.error.as_deref().unwrap_or("unknown")
        );
        Ok(())
    });
    client.on(EventKind::Error, |event| async move {
        error!(
            "[{}] connection error: {}",
            event.connection,
            event.error.as_deref().unwrap_or("unknown")
        );
        Ok(())
    });

    let mut ids = client.add_many(config.networks).await?;
    ids.extend(client.add_many(cli.networks).await?);
    info!("Connected networks: {}", ids.join(", "));

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    for id in client.connection_ids() {
        if let Err(e) = client.disconnect(&id).await {
            warn!("failed to close connection '{}': {}", id, e);
        }
    }

    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    Ok(())
}
