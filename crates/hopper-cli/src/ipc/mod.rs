//! IPC client for communicating with the hopper server
//!
//! Speaks newline-delimited JSON over the server's Unix socket.

mod client;

pub use client::{ClientError, HopperClient};

pub use hopper_core::config::default_socket_path;
pub use hopper_core::ipc::IpcResponse;
