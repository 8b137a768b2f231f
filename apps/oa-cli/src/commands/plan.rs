// plan.rs — Plan subcommands: create, start, complete, fail, show.

use clap::Subcommand;
use oa_state::{EngineConfig, PhaseStatus, TaskPlan};

use super::{format_time, Output};

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a plan, replacing any existing one.
    Create {
        /// What the task should achieve.
        goal: String,
        /// Phase names in order (e.g., Design Implement Test).
        phases: Vec<String>,
    },
    /// Make a phase the one in progress.
    Start {
        phase: String,
    },
    /// Complete a phase and move to the next pending one.
    Complete {
        phase: String,
    },
    /// Mark a phase as failed.
    Fail {
        phase: String,
        /// Why it failed.
        #[arg(long, short)]
        message: String,
    },
    /// Show the current plan.
    Show,
}

pub fn execute(cmd: &PlanCommands, config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let mut state = config.open_state()?;

    let plan = match cmd {
        PlanCommands::Create { goal, phases } => state.create_plan(goal, phases)?,
        PlanCommands::Start { phase } => state.start_phase(phase)?,
        PlanCommands::Complete { phase } => state.complete_phase(phase)?,
        PlanCommands::Fail { phase, message } => state.fail_phase(phase, message)?,
        PlanCommands::Show => match state.plan() {
            Some(plan) => plan.clone(),
            None => {
                return out.emit(&serde_json::Value::Null, || {
                    println!("No plan. Create one with `oa plan create <goal> <phases>...`.")
                });
            }
        },
    };

    out.emit(&plan, || print_plan(&plan))
}

fn status_marker(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Pending => "[ ]",
        PhaseStatus::InProgress => "[>]",
        PhaseStatus::Completed => "[x]",
        PhaseStatus::Failed => "[!]",
    }
}

pub fn print_plan(plan: &TaskPlan) {
    println!("Goal:     {}", plan.goal);
    println!("Status:   {}", plan.status);
    println!("Progress: {:.2}%", plan.progress());
    println!("Updated:  {}", format_time(&plan.updated_at));
    if plan.phases.is_empty() {
        println!("  (no phases)");
    }
    for phase in &plan.phases {
        println!("  {} {}", status_marker(phase.status), phase.name);
        if let Some(message) = &phase.error_message {
            println!("      error: {}", message);
        }
    }
}
