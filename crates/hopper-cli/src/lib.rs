//! Hopper command-line client
//!
//! Library half of the `hop` binary: a Unix socket client for the hopper
//! server plus the commands and output formatting built on it.

pub mod commands;
pub mod ipc;
pub mod output;
