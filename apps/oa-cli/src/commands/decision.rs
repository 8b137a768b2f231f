// decision.rs — Decision subcommands: add, list.

use clap::Subcommand;
use oa_state::EngineConfig;

use super::{format_time, Output};

#[derive(Subcommand)]
pub enum DecisionCommands {
    /// Record a decision and its rationale.
    Add {
        decision: String,
        #[arg(long, short)]
        rationale: String,
    },
    /// List recorded decisions.
    List,
}

pub fn execute(cmd: &DecisionCommands, config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let mut state = config.open_state()?;

    match cmd {
        DecisionCommands::Add {
            decision,
            rationale,
        } => {
            let record = state.add_decision(decision, rationale)?;
            out.emit(&record, || println!("Decision recorded."))
        }
        DecisionCommands::List => {
            let decisions = state.decisions();
            out.emit(&decisions, || {
                if decisions.is_empty() {
                    println!("No decisions.");
                }
                for d in decisions {
                    println!("{}  {}", format_time(&d.created_at), d.decision);
                    println!("      why: {}", d.rationale);
                }
            })
        }
    }
}
