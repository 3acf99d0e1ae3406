//! # gs-cli
//!
//! Command-line interface for guardrail synchronization.
//!
//! - `guardsync validate` — differential validation of policy/rule-text pairs (CI)
//! - `guardsync gate` — check a proposed change set against the active rule sets
//! - `guardsync sync` — process inbound policy events to a terminal outcome
//! - `guardsync resume` — re-enter interrupted runs from their checkpoints
//! - `guardsync status` / `cancel` — inspect and steer runs
//! - `guardsync ledger verify/tail` — inspect the hash-chained ledger
//! - `guardsync translate` — render one policy into rule text

mod commands;
mod context;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use context::Context;

/// Guardrail synchronization: translate, validate and commit policy rule sets.
#[derive(Parser)]
#[command(name = "guardsync", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Configuration file (defaults to <project-root>/guardsync.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate generated rule text against its governance documents.
    Validate(commands::validate::ValidateArgs),
    /// Gate a proposed change set on the active rule sets.
    Gate(commands::gate::GateArgs),
    /// Process policy event files.
    Sync(commands::sync::SyncArgs),
    /// Resume runs interrupted mid-flight.
    Resume {
        /// Print run reports as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show runs, leases and active rule sets.
    Status {
        /// Limit output to one policy identifier.
        #[arg(long)]
        policy_id: Option<String>,
    },
    /// Ask the in-flight run for a policy to stop at its next checkpoint.
    Cancel {
        /// Policy identifier.
        policy_id: String,
    },
    /// Inspect the rule set ledger.
    Ledger {
        #[command(subcommand)]
        command: commands::ledger::LedgerCommands,
    },
    /// Render one governance document into rule text.
    Translate(commands::translate::TranslateArgs),
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    // Logs go to stderr so reports on stdout stay machine-readable.
    let filter = EnvFilter::from_default_env()
        .add_directive("gs_sync=info".parse()?)
        .add_directive("guardsync=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let ctx = Context::load(&project_root, cli.config.as_deref())?;

    match &cli.command {
        Commands::Validate(args) => commands::validate::execute(args, &ctx),
        Commands::Gate(args) => commands::gate::execute(args, &ctx),
        Commands::Sync(args) => commands::sync::execute(args, &ctx),
        Commands::Resume { json } => commands::resume::execute(&ctx, *json),
        Commands::Status { policy_id } => commands::status::execute(&ctx, policy_id.as_deref()),
        Commands::Cancel { policy_id } => commands::cancel::execute(&ctx, policy_id),
        Commands::Ledger { command } => commands::ledger::execute(command, &ctx),
        Commands::Translate(args) => commands::translate::execute(args, &ctx),
    }
}
