//! Core error types for hopper

use hopper_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

use crate::ipc::{ErrorKind, ErrorPayload};

/// Top-level error type for the hopper state server
#[derive(Error, Debug)]
pub enum HopperError {
    /// Requested transition is illegal from the lode's current state
    #[error("Cannot {action} lode {id}: it is {state}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        state: String,
    },

    /// Unknown or ambiguous lode/backlog identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or empty required field
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable write failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Malformed request frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HopperError {
    /// Wire category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            HopperError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            HopperError::NotFound(_) => ErrorKind::NotFound,
            HopperError::Validation(_) | HopperError::Config(_) => ErrorKind::Validation,
            HopperError::Persistence(_) | HopperError::Io(_) => ErrorKind::Persistence,
            HopperError::Protocol(_) => ErrorKind::Protocol,
        }
    }

    /// Structured payload for an error response
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Errors reading or writing the persisted collections
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Collection file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Collection file could not be written or replaced
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record in a collection file is not valid JSON
    #[error("Corrupt record in {path} at line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be serialized
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result alias used throughout the server
pub type Result<T, E = HopperError> = std::result::Result<T, E>;
