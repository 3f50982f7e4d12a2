//! IPC surface: Unix socket listener and per-connection protocol loop

mod handler;
mod server;

pub use handler::handle_client;
pub use server::IpcServer;
