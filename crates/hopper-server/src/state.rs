//! Global server state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use hopper_core::config::ServerConfig;
use hopper_core::time::current_time_millis;
use hopper_core::traits::{ProjectRegistry, ProjectTable};
use hopper_core::HopperError;

use crate::hub::BroadcastHub;
use crate::store::{OwnerId, PersistenceLog, StateStore};

/// State shared by the listener and every connection task
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Canonical lode and backlog state
    pub store: StateStore,
    /// When the server started (Unix millis)
    pub started_at: u64,
    /// Fired to stop the listener and every connection
    pub shutdown: CancellationToken,
    next_connection: AtomicU64,
}

impl ServerState {
    /// Open the data directory named by the config
    pub fn open(config: ServerConfig) -> Result<Self, HopperError> {
        let projects = ProjectTable::new(config.projects.clone());
        if projects.is_empty() {
            tracing::debug!("No projects configured; accepting any project name");
        }
        Self::with_registry(config, Arc::new(projects))
    }

    /// Open with a custom project registry
    pub fn with_registry(
        config: ServerConfig,
        projects: Arc<dyn ProjectRegistry>,
    ) -> Result<Self, HopperError> {
        let hub = Arc::new(BroadcastHub::new(config.subscriber_queue));
        let log = PersistenceLog::new(config.data_dir.clone());
        let store = StateStore::open(log, hub, projects)?;

        Ok(Self {
            config,
            store,
            started_at: current_time_millis(),
            shutdown: CancellationToken::new(),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Allocate an identifier for a new connection
    pub fn next_connection_id(&self) -> OwnerId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }
}
