// status.rs — Whole-state commands: status, clear.

use oa_state::EngineConfig;

use super::Output;

pub fn show(config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let state = config.open_state()?;
    let status = state.status();

    out.emit(&status, || {
        println!("Backend:   {}", state.backend_name());
        match &status.plan {
            Some(plan) => {
                println!("Goal:      {}", plan.goal);
                if let (Some(phase), Some(progress)) = (&status.current_phase, status.progress) {
                    println!("Current:   {} ({:.2}% complete)", phase, progress);
                } else {
                    println!("Current:   none ({})", plan.status);
                }
            }
            None => println!("No plan."),
        }
        println!("Notes:     {}", status.notes_count);
        println!("Decisions: {}", status.decisions_count);
        println!("Errors:    {}", status.errors_count);
    })
}

pub fn clear(config: &EngineConfig, out: &Output) -> anyhow::Result<()> {
    let mut state = config.open_state()?;
    state.clear()?;
    let status = state.status();
    out.emit(&status, || println!("State cleared."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clear_removes_document() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::for_workspace(dir.path());
        let out = Output { json: true };

        let mut state = config.open_state().unwrap();
        state.create_plan("g", &["a"]).unwrap();
        assert!(dir.path().join(".agent_state.json").exists());

        show(&config, &out).unwrap();
        clear(&config, &out).unwrap();
        assert!(!dir.path().join(".agent_state.json").exists());
        assert!(!config.open_state().unwrap().status().has_plan);
    }
}
