//! Output formatting utilities for the CLI
//!
//! Tables for lodes and backlog items, detail views, and colored status
//! messages.

use std::sync::atomic::{AtomicBool, Ordering};

use tabled::{settings::Style, Table, Tabled};

use hopper_core::time::{format_age, format_age_at};
use hopper_core::{BacklogItem, Lode, Phase};

use crate::ipc::IpcResponse;

/// Format a list of lodes as an ASCII table
///
/// `archived` only changes the empty message.
pub fn format_lodes(lodes: &[Lode], archived: bool) -> String {
    if lodes.is_empty() {
        return if archived {
            "No archived lodes".to_string()
        } else {
            "No active lodes".to_string()
        };
    }

    #[derive(Tabled)]
    struct LodeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "PROJECT")]
        project: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "LODE")]
        label: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "UPDATED")]
        updated: String,
    }

    let rows: Vec<LodeRow> = lodes
        .iter()
        .map(|l| LodeRow {
            id: l.id.to_string(),
            project: truncate(&l.project, 16),
            state: state_label(l),
            label: truncate(l.label(), 32),
            status: if l.status.is_empty() {
                "-".to_string()
            } else {
                truncate(&l.status, 24)
            },
            updated: format_age(l.updated_at),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Short state for tables: the phase, with a marker for an attached agent
fn state_label(lode: &Lode) -> String {
    match lode.phase() {
        Phase::Progressing(stage) if lode.active => format!("{} *", stage),
        phase => phase.to_string(),
    }
}

/// Format a single lode as a detail view
pub fn format_lode(lode: &Lode) -> String {
    let mut output = String::new();

    output.push_str(&format!("Lode: {}\n", lode.id));
    output.push_str(&format!("Project: {}\n", lode.project));
    if let Some(title) = &lode.title {
        output.push_str(&format!("Title: {}\n", title));
    }
    output.push_str(&format!("Scope: {}\n", lode.scope));
    output.push_str(&format!("State: {}\n", lode.phase()));
    output.push_str(&format!(
        "Agent: {}\n",
        if lode.active { "attached" } else { "detached" }
    ));
    if !lode.status.is_empty() {
        output.push_str(&format!("Status: {}\n", lode.status));
    }
    if let Some(window) = &lode.window_ref {
        output.push_str(&format!("Window: {}\n", window));
    }
    if let Some(error) = &lode.error {
        output.push_str(&format!("Error: {}\n", error));
    }
    if let Some(doc) = &lode.review_doc {
        output.push_str(&format!("Review: {}\n", doc));
    }
    for (stage, artifact) in &lode.outputs {
        output.push_str(&format!("Output ({}): {}\n", stage, artifact));
    }
    if let Some(item) = &lode.backlog {
        output.push_str(&format!("From backlog: {} ({})\n", item.description, item.short_id()));
    }
    output.push_str(&format!("Created: {}\n", format_age(lode.created_at)));
    output.push_str(&format!("Updated: {}\n", format_age(lode.updated_at)));

    output
}

/// Format backlog items as an ASCII table
pub fn format_backlog(items: &[BacklogItem]) -> String {
    if items.is_empty() {
        return "Backlog is empty".to_string();
    }

    #[derive(Tabled)]
    struct BacklogRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "PROJECT")]
        project: String,
        #[tabled(rename = "DESCRIPTION")]
        description: String,
        #[tabled(rename = "FROM")]
        from: String,
        #[tabled(rename = "ADDED")]
        added: String,
    }

    let rows: Vec<BacklogRow> = items
        .iter()
        .map(|i| BacklogRow {
            id: i.short_id().to_string(),
            project: truncate(&i.project, 16),
            description: truncate(&i.description, 48),
            from: i
                .lode_id
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            added: format_age(i.created_at),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a ping response as a server status block
pub fn format_server_status(response: &IpcResponse, now_ms: u64) -> String {
    let mut output = String::new();

    output.push_str("Server: Running\n");
    if let Some(version) = &response.version {
        output.push_str(&format!("Version: {}\n", version));
    }
    if let Some(started_at) = response.started_at {
        output.push_str(&format!("Started: {}\n", format_age_at(started_at, now_ms)));
    }
    if let Some(seq) = response.seq {
        output.push_str(&format!("Sequence: {}\n", seq));
    }

    output
}

/// Truncate a string with ellipsis if too long
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
}

static QUIET: AtomicBool = AtomicBool::new(false);

/// Silence success, info and warning messages
///
/// Errors and command results still print.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    if is_quiet() {
        return;
    }

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    if is_quiet() {
        return;
    }

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    if is_quiet() {
        return;
    }

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
