//! Configuration management for hopper

mod server;

pub use server::{ProjectEntry, ServerConfig, DEFAULT_SUBSCRIBER_QUEUE};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory
pub const DIR_ENV: &str = "HOPPER_DIR";

/// Environment variable overriding the socket path for clients
pub const SOCKET_ENV: &str = "HOPPER_SOCKET";

/// Socket file name inside the data directory
pub const SOCKET_FILE: &str = "server.sock";

/// Get the default data directory
///
/// `$HOPPER_DIR` wins, then the platform data directory.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hopper")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Socket path a client should dial when none is given explicitly
pub fn default_socket_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    default_data_dir().join(SOCKET_FILE)
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}
