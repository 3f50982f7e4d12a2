//! hopper-core: Core types and workflow rules for the hopper state server
//!
//! This crate provides the lode data model, the workflow state machine, the
//! IPC message catalogue, configuration and error types shared by the
//! server and the command-line client.

pub mod config;
pub mod error;
pub mod ipc;
pub mod time;
pub mod traits;
pub mod types;
pub mod workflow;

pub use error::{ConfigError, HopperError, PersistenceError};
pub use types::{BacklogItem, Lode, LodeId, Phase, Stage, Terminal};
pub use workflow::{Effect, Transition};
