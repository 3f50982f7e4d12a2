//! State server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use hopper_protocol::MAX_FRAME_SIZE;

/// Default capacity of each subscriber's outbound queue
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

/// Configuration for the state server daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory holding the collection files
    pub data_dir: PathBuf,

    /// Unix socket path; defaults to `server.sock` inside `data_dir`
    pub socket_path: Option<PathBuf>,

    /// Frames buffered per subscriber before it is dropped
    pub subscriber_queue: usize,

    /// Longest accepted request line in bytes
    pub max_frame_bytes: usize,

    /// How long shutdown waits for open connections to finish, in seconds
    #[serde(with = "secs")]
    pub shutdown_grace: Duration,

    /// Known projects; an empty list accepts any project name
    pub projects: Vec<ProjectEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: super::default_data_dir(),
            socket_path: None,
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            max_frame_bytes: MAX_FRAME_SIZE,
            shutdown_grace: Duration::from_secs(5),
            projects: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Resolved socket path
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(super::SOCKET_FILE))
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        if self.subscriber_queue == 0 {
            return Err(ConfigError::Invalid(
                "subscriber_queue must be at least 1".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_bytes must be at least 1".to_string(),
            ));
        }
        for project in &self.projects {
            if project.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "project entries need a name".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One entry of the project registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: String,

    /// Checkout location, informational only
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Disabled projects cannot receive new lodes or backlog items
    #[serde(default)]
    pub disabled: bool,
}

// Duration as whole seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.subscriber_queue, 256);
        assert_eq!(config.max_frame_bytes, 1024 * 1024);
        assert!(config.projects.is_empty());
        assert_eq!(config.socket_path(), config.data_dir.join("server.sock"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/hopper"
            subscriber_queue = 16
            shutdown_grace = 2

            [[projects]]
            name = "demo"
            path = "/src/demo"

            [[projects]]
            name = "old"
            disabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/hopper"));
        assert_eq!(config.subscriber_queue, 16);
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.max_frame_bytes, MAX_FRAME_SIZE);
        assert_eq!(config.projects.len(), 2);
        assert!(config.projects[1].disabled);
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/var/lib/hopper/server.sock")
        );
    }

    #[test]
    fn test_validate_rejects_zero_queue() {
        let config = ServerConfig {
            subscriber_queue: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ServerConfig::default().validate().is_ok());
    }
}
