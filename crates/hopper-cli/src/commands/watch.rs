//! Watch command implementation

use std::time::Duration;

use anyhow::Result;

use hopper_core::Lode;

use crate::ipc::HopperClient;
use crate::output::{print_error, print_success, print_warning};

/// Exit code when the watch gives up before the lode finishes
pub const TIMEOUT_EXIT_CODE: i32 = 2;

fn print_update(lode: &Lode) {
    if lode.status.is_empty() {
        println!("{}  {}", lode.id, lode.phase());
    } else {
        println!("{}  {}  {}", lode.id, lode.phase(), lode.status);
    }
}

/// Follow a lode until it finishes and return the process exit code
pub async fn watch_command(
    client: &mut HopperClient,
    id: &str,
    timeout: Option<Duration>,
) -> Result<i32> {
    let watch = client.watch(id, print_update);

    let terminal = match timeout {
        Some(limit) => match tokio::time::timeout(limit, watch).await {
            Ok(result) => result?,
            Err(_) => {
                print_warning(&format!("Gave up waiting for {} after {:?}", id, limit));
                return Ok(TIMEOUT_EXIT_CODE);
            }
        },
        None => watch.await?,
    };

    match terminal.exit_code() {
        0 => print_success(&format!("Lode {} finished: {}", id, terminal)),
        _ => print_error(&format!("Lode {} finished: {}", id, terminal)),
    }
    Ok(terminal.exit_code())
}
