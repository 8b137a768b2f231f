// note.rs — Note subcommands: add, list.

use clap::Subcommand;
use oa_state::EngineConfig;

use super::{format_time, Output};

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Append a note.
    Add {
        content: String,
        /// File the note under a section (e.g., "api").
        #[arg(long)]
        section: Option<String>,
    },
    /// List notes in the order they were added.
    List {
        /// Only notes in exactly this section.
        #[arg(long)]
        section: Option<String>,
    },
}

pub fn execute(cmd: &NoteCommands, config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let mut state = config.open_state()?;

    match cmd {
        NoteCommands::Add { content, section } => {
            let note = state.add_note(content, section.as_deref())?;
            out.emit(&note, || println!("Note added."))
        }
        NoteCommands::List { section } => {
            let notes = state.notes(section.as_deref());
            out.emit(&notes, || {
                if notes.is_empty() {
                    println!("No notes.");
                }
                for note in &notes {
                    match &note.section {
                        Some(section) => println!(
                            "{}  [{}] {}",
                            format_time(&note.created_at),
                            section,
                            note.content
                        ),
                        None => println!("{}  {}", format_time(&note.created_at), note.content),
                    }
                }
            })
        }
    }
}
