//! # oa-cli
//!
//! Command-line front end for the OpenAgent working-memory engine.
//!
//! - `oa plan create/start/complete/fail/show` — manage the task plan
//! - `oa note`, `oa decision`, `oa error` — append to and list the journal
//! - `oa status` / `oa clear` — inspect or reset the whole state
//! - `oa history list/rollback` — browse and restore backend history
//! - `oa password` — generate a password for the encrypted backend
//!
//! Backend selection comes from `<workspace>/.oa/config.toml`.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use oa_state::EngineConfig;
use tracing_subscriber::EnvFilter;

use commands::Output;

/// OpenAgent working memory: plans, notes, decisions and errors.
#[derive(Parser)]
#[command(name = "oa", version, about)]
struct Cli {
    /// Workspace directory (defaults to current directory).
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and advance the task plan.
    Plan {
        #[command(subcommand)]
        command: commands::plan::PlanCommands,
    },
    /// Add or list notes.
    Note {
        #[command(subcommand)]
        command: commands::note::NoteCommands,
    },
    /// Record or list decisions.
    Decision {
        #[command(subcommand)]
        command: commands::decision::DecisionCommands,
    },
    /// Log or list errors.
    Error {
        #[command(subcommand)]
        command: commands::errors::ErrorCommands,
    },
    /// Show plan, current phase, progress and journal counts.
    Status,
    /// Remove the plan, the journal and any backend history.
    Clear,
    /// Browse or roll back backend history.
    History {
        #[command(subcommand)]
        command: commands::history::HistoryCommands,
    },
    /// Print a random password for the encrypted backend.
    Password,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't mix with command output on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("oa_state=info".parse()?)
                .add_directive("oa_storage=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let out = Output { json: cli.json };

    if let Commands::Password = cli.command {
        return commands::password::execute(&out);
    }

    let workspace = cli.workspace.canonicalize().unwrap_or(cli.workspace);
    let config = EngineConfig::load(&workspace)?;
    tracing::debug!(
        workspace = %workspace.display(),
        backend = config.storage.backend_name(),
        "loaded engine config"
    );

    match &cli.command {
        Commands::Plan { command } => commands::plan::execute(command, &config, &out),
        Commands::Note { command } => commands::note::execute(command, &config, &out),
        Commands::Decision { command } => commands::decision::execute(command, &config, &out),
        Commands::Error { command } => commands::errors::execute(command, &config, &out),
        Commands::Status => commands::status::show(&config, &out),
        Commands::Clear => commands::status::clear(&config, &out),
        Commands::History { command } => commands::history::execute(command, &config, &out),
        Commands::Password => commands::password::execute(&out),
    }
}
