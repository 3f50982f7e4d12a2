//! hopper state server daemon
//!
//! Owns lode state and serves it to agents, dashboards and the `hop` CLI
//! over a Unix socket.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hopper_core::config::{self, ServerConfig};
use hopper_server::{IpcServer, ServerState};

#[derive(Parser)]
#[command(name = "hopper-server")]
#[command(about = "hopper lode state server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(short, long, env = "HOPPER_DIR")]
    data_dir: Option<PathBuf>,

    /// Socket path (overrides config)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("hopper server starting...");

    let mut config = load_config(&args)?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(socket) = args.socket {
        config.socket_path = Some(socket);
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("Data directory: {}", config.data_dir.display());

    let state = Arc::new(ServerState::open(config).context("Failed to load persisted state")?);

    spawn_signal_handler(state.shutdown.clone());

    let server = IpcServer::new(Arc::clone(&state));
    server.run().await?;

    tracing::info!("hopper server shutdown complete");
    Ok(())
}

/// Explicit `--config` must load; the default location is optional
fn load_config(args: &Args) -> Result<ServerConfig> {
    if let Some(path) = &args.config {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = match &args.data_dir {
        Some(dir) => dir.join("config.toml"),
        None => config::default_config_path(),
    };

    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            ServerConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(ServerConfig::default())
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
            _ = cancel.cancelled() => return,
        }

        cancel.cancel();
    });
}
