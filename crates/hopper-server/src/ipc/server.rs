//! Unix socket listener
//!
//! Accepts connections on the server socket and runs each one on its own
//! task until the shutdown token fires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;

use crate::state::ServerState;

use super::handler::handle_client;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// IPC server for lode clients
///
/// Listens on a Unix socket only; there is no network listener.
pub struct IpcServer {
    /// Socket path
    pub socket_path: PathBuf,
    /// Server state
    state: Arc<ServerState>,
}

impl IpcServer {
    /// Create a new IPC server on the socket named by the config
    pub fn new(state: Arc<ServerState>) -> Self {
        Self {
            socket_path: state.config.socket_path(),
            state,
        }
    }

    /// Bind the socket, clearing a stale file left by a dead server
    ///
    /// Fails if another server answers on the same path.
    pub async fn bind(&self) -> Result<UnixListener> {
        let path = &self.socket_path;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory {}", parent.display())
            })?;
        }

        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                bail!("Another server is already listening on {}", path.display());
            }
            tracing::info!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind IPC server to {}", path.display()))?;
        tracing::info!("IPC server listening on {}", path.display());
        Ok(listener)
    }

    /// Bind and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve an already bound listener until shutdown
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let state = Arc::clone(&self.state);
                        connections.spawn(async move {
                            if let Err(e) = handle_client(stream, state).await {
                                tracing::warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => accept_failed(e).await,
                },

                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!("Connection task failed: {}", e);
                    }
                }

                _ = shutdown.cancelled() => break,
            }
        }

        tracing::info!("IPC server stopping with {} open connections", connections.len());
        drop(listener);
        remove_socket(&self.socket_path);

        let grace = self.state.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Aborting {} connections after {:?}", connections.len(), grace);
            connections.shutdown().await;
        }

        Ok(())
    }
}

/// Log a failed accept and pause before the next one
///
/// Errors such as running out of descriptors persist for a while.
async fn accept_failed(error: std::io::Error) {
    tracing::error!("Failed to accept IPC connection: {}", error);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed socket {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove socket {}: {}", path.display(), e),
    }
}
