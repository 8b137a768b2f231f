// history.rs — Backend history: list, rollback.

use clap::Subcommand;
use oa_state::EngineConfig;

use super::{format_time, Output};

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List recorded saves, most recent first.
    List {
        /// Maximum entries to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Restore the document as it was before history entry INDEX
    /// (0 = most recent save).
    Rollback {
        index: usize,
    },
}

pub fn execute(cmd: &HistoryCommands, config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let mut state = config.open_state()?;
    if !state.supports_history() {
        anyhow::bail!(
            "the {} backend keeps no history; configure sqlite or kv with `history = true` in .oa/config.toml",
            state.backend_name()
        );
    }

    match cmd {
        HistoryCommands::List { limit } => {
            let entries = state.history(*limit)?;
            out.emit(&entries, || {
                if entries.is_empty() {
                    println!("No history.");
                }
                for (index, entry) in entries.iter().enumerate() {
                    println!(
                        "{:>3}  v{:<5} {:<7} {}",
                        index,
                        entry.version,
                        entry.change_kind.as_str(),
                        format_time(&entry.created_at)
                    );
                }
            })
        }
        HistoryCommands::Rollback { index } => {
            if !state.rollback(*index)? {
                anyhow::bail!("no history entry at index {}", index);
            }
            let status = state.status();
            out.emit(&status, || println!("Rolled back to the state before entry {}.", index))
        }
    }
}
