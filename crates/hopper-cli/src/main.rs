//! hop: command-line client for the hopper server
//!
//! Every command opens one connection to the server socket, sends its
//! request, and prints the outcome.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hopper_cli::commands::{self, LodeAction};
use hopper_cli::ipc::HopperClient;
use hopper_cli::output::{print_error, set_quiet};
use hopper_core::config::SOCKET_ENV;

#[derive(Parser)]
#[command(name = "hop")]
#[command(author, version, about = "Drive lodes through the hopper workflow")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the server socket
    #[arg(short, long, global = true, env = SOCKET_ENV)]
    socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print command results and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is up
    Ping,

    /// Stop the server
    #[command(alias = "shutdown")]
    Stop,

    /// Create a lode in the mill stage
    Create {
        /// Project the lode belongs to
        project: String,
        /// What the lode should accomplish
        scope: String,
        /// Short display title
        #[arg(short, long)]
        title: Option<String>,
    },

    /// List lodes
    #[command(alias = "ls")]
    List {
        /// List archived lodes instead of active ones
        #[arg(short, long)]
        archived: bool,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one lode
    Show {
        /// Lode ID or unique prefix
        id: String,
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Record the current stage's output and move to the next stage
    #[command(alias = "processed")]
    Advance {
        id: String,
        /// Artifact reference for the finished stage
        #[arg(default_value = "")]
        output: String,
    },

    /// Pause a lode for review
    Gate {
        id: String,
        /// Review document reference
        doc: String,
    },

    /// Continue a gated lode
    Resume { id: String },

    /// Mark a lode as failed
    Fail {
        id: String,
        /// Why the lode failed
        reason: String,
    },

    /// Rerun a failed or detached lode's current stage
    Restart { id: String },

    /// Move a lode to the archive
    Archive { id: String },

    /// Bring a lode back from the archive
    Unarchive { id: String },

    /// Set a lode's status text
    Status {
        id: String,
        /// Status text; empty clears it
        #[arg(default_value = "")]
        text: String,
    },

    /// Follow a lode until it ships, fails or is archived
    ///
    /// Exits 0 when shipped or archived, 1 on error, 2 on timeout.
    Watch {
        id: String,
        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Manage the backlog
    Backlog {
        #[command(subcommand)]
        action: BacklogAction,
    },
}

#[derive(Subcommand)]
enum BacklogAction {
    /// File a backlog item
    Add {
        project: String,
        description: String,
    },

    /// List backlog items
    #[command(alias = "ls")]
    List,

    /// Delete a backlog item
    #[command(alias = "rm")]
    Remove {
        /// Item ID or unique prefix
        id: String,
    },

    /// Turn a backlog item into a lode
    Promote {
        id: String,
        /// Scope for the new lode; defaults to the item description
        #[arg(long)]
        scope: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    set_quiet(cli.quiet);

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e));
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut client = cli.socket.map(HopperClient::with_socket).unwrap_or_default();

    match cli.command {
        Commands::Ping => commands::ping_command(&mut client).await?,
        Commands::Stop => commands::stop_command(&mut client).await?,

        Commands::Create {
            project,
            scope,
            title,
        } => {
            commands::create_command(&mut client, &project, &scope, title).await?
        }
        Commands::List { archived, json } => {
            commands::list_command(&mut client, archived, json).await?
        }
        Commands::Show { id, json } => commands::show_command(&mut client, &id, json).await?,

        Commands::Advance { id, output } => {
            commands::transition_command(&mut client, &id, LodeAction::Advance { output }).await?
        }
        Commands::Gate { id, doc } => {
            commands::transition_command(&mut client, &id, LodeAction::Gate { doc }).await?
        }
        Commands::Resume { id } => {
            commands::transition_command(&mut client, &id, LodeAction::Resume).await?
        }
        Commands::Fail { id, reason } => {
            commands::transition_command(&mut client, &id, LodeAction::Fail { reason }).await?
        }
        Commands::Restart { id } => {
            commands::transition_command(&mut client, &id, LodeAction::Restart).await?
        }
        Commands::Archive { id } => {
            commands::transition_command(&mut client, &id, LodeAction::Archive).await?
        }
        Commands::Unarchive { id } => {
            commands::transition_command(&mut client, &id, LodeAction::Unarchive).await?
        }
        Commands::Status { id, text } => {
            commands::transition_command(&mut client, &id, LodeAction::Status { text }).await?
        }

        Commands::Watch { id, timeout } => {
            let timeout = timeout.map(Duration::from_secs);
            return commands::watch_command(&mut client, &id, timeout).await;
        }

        Commands::Backlog { action } => match action {
            BacklogAction::Add {
                project,
                description,
            } => {
                commands::backlog_add(&mut client, &project, &description).await?
            }
            BacklogAction::List => commands::backlog_list(&mut client).await?,
            BacklogAction::Remove { id } => commands::backlog_remove(&mut client, &id).await?,
            BacklogAction::Promote { id, scope } => {
                commands::backlog_promote(&mut client, &id, scope).await?
            }
        },
    }

    Ok(0)
}
