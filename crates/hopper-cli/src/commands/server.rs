//! Server lifecycle commands

use anyhow::Result;

use hopper_core::time::current_time_millis;

use crate::ipc::HopperClient;
use crate::output::{format_server_status, print_info, print_success};

/// Execute the ping command
pub async fn ping_command(client: &mut HopperClient) -> Result<()> {
    let response = client.ping().await?;
    print!("{}", format_server_status(&response, current_time_millis()));
    Ok(())
}

/// Execute the stop command
pub async fn stop_command(client: &mut HopperClient) -> Result<()> {
    print_info("Stopping server...");
    client.shutdown().await?;
    print_success("Server stopped");
    Ok(())
}
