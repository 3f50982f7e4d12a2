//! Lode commands

use anyhow::Result;

use crate::ipc::HopperClient;
use crate::output::{format_lode, format_lodes, print_success};

/// Execute the create command
pub async fn create_command(
    client: &mut HopperClient,
    project: &str,
    scope: &str,
    title: Option<String>,
) -> Result<()> {
    let lode = client.create(project, scope, title).await?;
    print_success(&format!("Created lode {} in {}", lode.id, lode.stage));
    Ok(())
}

/// Execute the list command
///
/// `json` prints the raw lode records instead of a table.
pub async fn list_command(client: &mut HopperClient, archived: bool, json: bool) -> Result<()> {
    let lodes = client.list(archived).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&lodes)?);
    } else {
        println!("{}", format_lodes(&lodes, archived));
    }
    Ok(())
}

/// Execute the show command
pub async fn show_command(client: &mut HopperClient, id: &str, json: bool) -> Result<()> {
    let lode = client.get(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&lode)?);
    } else {
        print!("{}", format_lode(&lode));
    }
    Ok(())
}

/// A single-lode mutation requested from the command line
#[derive(Debug, Clone)]
pub enum LodeAction {
    Advance { output: String },
    Gate { doc: String },
    Resume,
    Fail { reason: String },
    Restart,
    Archive,
    Unarchive,
    Status { text: String },
}

/// Apply one action to a lode and report the resulting state
pub async fn transition_command(
    client: &mut HopperClient,
    id: &str,
    action: LodeAction,
) -> Result<()> {
    let (lode, verb) = match action {
        LodeAction::Advance { output } => (client.advance(id, &output).await?, "Advanced"),
        LodeAction::Gate { doc } => (client.gate(id, &doc).await?, "Gated"),
        LodeAction::Resume => (client.resume(id).await?, "Resumed"),
        LodeAction::Fail { reason } => (client.fail(id, &reason).await?, "Failed"),
        LodeAction::Restart => (client.restart(id).await?, "Restarted"),
        LodeAction::Archive => (client.archive(id).await?, "Archived"),
        LodeAction::Unarchive => (client.unarchive(id).await?, "Restored"),
        LodeAction::Status { text } => (client.set_status(id, &text).await?, "Updated"),
    };

    print_success(&format!("{} lode {} ({})", verb, lode.id, lode.phase()));
    Ok(())
}
