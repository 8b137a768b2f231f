// errors.rs — Error-log subcommands: log, list.

use clap::Subcommand;
use oa_state::EngineConfig;

use super::{format_time, Output};

#[derive(Subcommand)]
pub enum ErrorCommands {
    /// Log an error, optionally with how it was resolved.
    Log {
        error: String,
        #[arg(long)]
        resolution: Option<String>,
    },
    /// List logged errors.
    List,
}

pub fn execute(cmd: &ErrorCommands, config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let mut state = config.open_state()?;

    match cmd {
        ErrorCommands::Log { error, resolution } => {
            let record = state.log_error(error, resolution.as_deref())?;
            out.emit(&record, || println!("Error logged."))
        }
        ErrorCommands::List => {
            let errors = state.errors();
            out.emit(&errors, || {
                if errors.is_empty() {
                    println!("No errors logged.");
                }
                for e in errors {
                    println!("{}  {}", format_time(&e.created_at), e.error);
                    if e.resolution.is_empty() {
                        println!("      unresolved");
                    } else {
                        println!("      resolved: {}", e.resolution);
                    }
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn logged_errors_persist_with_resolution() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::for_workspace(dir.path());
        let out = Output { json: true };

        execute(
            &ErrorCommands::Log {
                error: "timeout".into(),
                resolution: None,
            },
            &config,
            &out,
        )
        .unwrap();
        execute(
            &ErrorCommands::Log {
                error: "bad input".into(),
                resolution: Some("validated".into()),
            },
            &config,
            &out,
        )
        .unwrap();
        execute(&ErrorCommands::List, &config, &out).unwrap();

        let state = config.open_state().unwrap();
        let errors = state.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].resolution, "");
        assert_eq!(errors[1].resolution, "validated");
    }
}
