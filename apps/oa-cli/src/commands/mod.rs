// mod.rs — Subcommand modules and shared output formatting.

pub mod decision;
pub mod errors;
pub mod history;
pub mod note;
pub mod password;
pub mod plan;
pub mod status;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

/// Where command results go: pretty JSON or human-readable text.
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as JSON in `--json` mode, otherwise run `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }
}

/// Local-time rendering for human output.
pub fn format_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
