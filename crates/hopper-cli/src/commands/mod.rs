//! CLI command implementations

mod backlog;
mod lode;
mod server;
mod watch;

pub use backlog::{backlog_add, backlog_list, backlog_promote, backlog_remove};
pub use lode::{create_command, list_command, show_command, transition_command, LodeAction};
pub use server::{ping_command, stop_command};
pub use watch::{watch_command, TIMEOUT_EXIT_CODE};
