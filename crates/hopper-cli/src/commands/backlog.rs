//! Backlog commands

use anyhow::Result;

use crate::ipc::HopperClient;
use crate::output::{format_backlog, print_success};

/// Execute the backlog add command
pub async fn backlog_add(
    client: &mut HopperClient,
    project: &str,
    description: &str,
) -> Result<()> {
    let item = client.backlog_add(project, description).await?;
    print_success(&format!("Added backlog item {}", item.short_id()));
    Ok(())
}

/// Execute the backlog list command
pub async fn backlog_list(client: &mut HopperClient) -> Result<()> {
    let items = client.backlog_list().await?;
    println!("{}", format_backlog(&items));
    Ok(())
}

/// Execute the backlog remove command
pub async fn backlog_remove(client: &mut HopperClient, id: &str) -> Result<()> {
    let item = client.backlog_remove(id).await?;
    print_success(&format!("Removed backlog item {}", item.short_id()));
    Ok(())
}

/// Execute the backlog promote command
pub async fn backlog_promote(
    client: &mut HopperClient,
    id: &str,
    scope: Option<String>,
) -> Result<()> {
    let lode = client.backlog_promote(id, scope).await?;
    print_success(&format!("Promoted to lode {} in {}", lode.id, lode.stage));
    Ok(())
}
