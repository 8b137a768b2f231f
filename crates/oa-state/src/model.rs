// model.rs — Plan, phase and journal records, and the persisted document.
//
// Field order in every struct matches the persisted layout. Timestamps are
// written RFC 3339 and read leniently (see `timestamp`), so documents written
// by older tools with naive local-time strings still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::migrate::CURRENT_VERSION;

/// Lifecycle status of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub const ALL: [PhaseStatus; 4] = [
        PhaseStatus::Pending,
        PhaseStatus::InProgress,
        PhaseStatus::Completed,
        PhaseStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl PlanStatus {
    pub const ALL: [PlanStatus; 3] = [
        PlanStatus::Active,
        PlanStatus::Completed,
        PlanStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::Completed => "completed",
            PlanStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ordered stage of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPhase {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: PhaseStatus,

    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Set when the phase fails.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TaskPhase {
    /// A pending phase at zero-based `index` in its plan.
    pub fn new(index: usize, name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Phase {}: {}", index + 1, name),
            status: PhaseStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// The top-level task: a goal and its ordered phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub goal: String,

    /// Order is significant: it defines which phase comes "next".
    #[serde(default)]
    pub phases: Vec<TaskPhase>,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub status: PlanStatus,
}

impl TaskPlan {
    pub fn new<S: AsRef<str>>(goal: &str, phases: &[S]) -> Self {
        let now = Utc::now();
        Self {
            goal: goal.to_string(),
            phases: phases
                .iter()
                .enumerate()
                .map(|(i, name)| TaskPhase::new(i, name.as_ref()))
                .collect(),
            created_at: now,
            updated_at: now,
            status: PlanStatus::Active,
        }
    }

    /// The phase currently in progress, if any.
    pub fn current_phase(&self) -> Option<&TaskPhase> {
        self.phases
            .iter()
            .find(|p| p.status == PhaseStatus::InProgress)
    }

    /// Index of the first pending phase in plan order.
    pub fn next_pending(&self) -> Option<usize> {
        self.phases
            .iter()
            .position(|p| p.status == PhaseStatus::Pending)
    }

    pub fn phase_index(&self, name: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.name == name)
    }

    pub fn completed_count(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count()
    }

    /// Percentage of completed phases, rounded to two decimals.
    /// A plan without phases is at 0.
    pub fn progress(&self) -> f64 {
        if self.phases.is_empty() {
            return 0.0;
        }
        let raw = 100.0 * self.completed_count() as f64 / self.phases.len() as f64;
        (raw * 100.0).round() / 100.0
    }

    /// Refresh `updated_at` without ever moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }
}

/// A free-form note, optionally filed under a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub content: String,

    #[serde(default)]
    pub section: Option<String>,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

/// A recorded decision and why it was made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: String,

    #[serde(default)]
    pub rationale: String,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

/// An error encountered during the task and how it was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    pub error: String,

    /// Empty when unresolved.
    #[serde(default)]
    pub resolution: String,

    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

/// The unit a storage backend persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub version: u32,
    pub plan: Option<TaskPlan>,
    pub notes: Vec<Note>,
    pub decisions: Vec<Decision>,
    pub errors: Vec<ErrorLog>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            plan: None,
            notes: Vec::new(),
            decisions: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Lenient timestamp decoding.
///
/// Accepts RFC 3339, or ISO 8601 without an offset (read as UTC). Missing,
/// null, empty or unparseable values become "now" for required timestamps
/// and `None` for optional ones.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(deserialize_option(deserializer)?.unwrap_or_else(Utc::now))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}
