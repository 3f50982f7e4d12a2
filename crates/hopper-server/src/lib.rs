//! hopper-server: Lode state server
//!
//! The server owns every lode and backlog item, applies the workflow rules
//! through a single mutation path, persists each change to JSONL files and
//! fans committed changes out to dashboard subscribers and lode watchers
//! over a Unix socket.

pub mod hub;
pub mod ipc;
pub mod state;
pub mod store;

pub use hub::BroadcastHub;
pub use ipc::IpcServer;
pub use state::ServerState;
pub use store::StateStore;
