// events.rs — Change events and observer delivery.
//
// The state aggregate emits an event after every load, save and mutation.
// Observers (event logs, dashboards, tool bridges) subscribe to a
// `StateNotifier`; delivery is synchronous and in registration order.
// An observer that errors or panics is logged and skipped; it never affects
// the mutation that triggered the event or the observers after it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Characters of free text carried in note/decision/error events.
pub const PREVIEW_CHARS: usize = 50;

/// An event with the time it was emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl StateEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    StateLoaded {
        has_plan: bool,
    },
    StateSaved {
        has_plan: bool,
    },
    PlanCreated {
        goal: String,
        /// Number of phases in the new plan.
        phases: usize,
    },
    PhaseStarted {
        phase: String,
    },
    PhaseCompleted {
        phase: String,
        /// The phase promoted to in_progress, if any.
        next_phase: Option<String>,
    },
    PhaseFailed {
        phase: String,
        error: String,
    },
    NoteAdded {
        section: Option<String>,
        preview: String,
    },
    DecisionAdded {
        preview: String,
    },
    ErrorLogged {
        preview: String,
    },
    StateCleared {},
    StateReloaded {
        has_plan: bool,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::StateLoaded { .. } => "state_loaded",
            EventPayload::StateSaved { .. } => "state_saved",
            EventPayload::PlanCreated { .. } => "plan_created",
            EventPayload::PhaseStarted { .. } => "phase_started",
            EventPayload::PhaseCompleted { .. } => "phase_completed",
            EventPayload::PhaseFailed { .. } => "phase_failed",
            EventPayload::NoteAdded { .. } => "note_added",
            EventPayload::DecisionAdded { .. } => "decision_added",
            EventPayload::ErrorLogged { .. } => "error_logged",
            EventPayload::StateCleared {} => "state_cleared",
            EventPayload::StateReloaded { .. } => "state_reloaded",
        }
    }
}

/// First `PREVIEW_CHARS` characters of `text`.
pub fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Receives state change events.
///
/// Errors are logged by the notifier but never stop delivery.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, event: &StateEvent) -> Result<(), StateError>;
}

impl<F> StateObserver for F
where
    F: Fn(&StateEvent) -> Result<(), StateError> + Send + Sync,
{
    fn on_state_change(&self, event: &StateEvent) -> Result<(), StateError> {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered set of observers.
#[derive(Default)]
pub struct StateNotifier {
    observers: Vec<(ObserverId, Box<dyn StateObserver>)>,
    next_id: u64,
}

impl StateNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Box<dyn StateObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver an event to every observer.
    pub fn notify(&self, payload: EventPayload) {
        if self.observers.is_empty() {
            return;
        }
        let event = StateEvent::new(payload);
        for (id, observer) in &self.observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_state_change(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    observer = id.0,
                    event_type = event.event_type(),
                    error = %e,
                    "state observer failed"
                ),
                Err(_) => tracing::warn!(
                    observer = id.0,
                    event_type = event.event_type(),
                    "state observer panicked"
                ),
            }
        }
    }
}

impl std::fmt::Debug for StateNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateNotifier")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Appends each event as one JSON line.
pub struct JsonlObserver {
    path: PathBuf,
}

impl JsonlObserver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JsonlObserver {
    fn append(&self, event: &StateEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)
    }
}

impl StateObserver for JsonlObserver {
    fn on_state_change(&self, event: &StateEvent) -> Result<(), StateError> {
        self.append(event).map_err(|e| {
            StateError::ObserverError(format!(
                "event log {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> Box<dyn StateObserver> {
        Box::new(move |event: &StateEvent| -> Result<(), StateError> {
            log.lock()
                .unwrap()
                .push(format!("{tag}:{}", event.event_type()));
            Ok(())
        })
    }

    #[test]
    fn event_wire_format_is_flat() {
        let event = StateEvent::new(EventPayload::PhaseCompleted {
            phase: "Design".into(),
            next_phase: Some("Implement".into()),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "phase_completed");
        assert_eq!(value["phase"], "Design");
        assert_eq!(value["next_phase"], "Implement");
        assert!(value["timestamp"].is_string());

        let restored: StateEvent = serde_json::from_value(value).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn state_cleared_has_no_fields() {
        let value = serde_json::to_value(StateEvent::new(EventPayload::StateCleared {})).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(value["event_type"], "state_cleared");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(80);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 50);
        assert!(long.starts_with(&p));
    }

    #[test]
    fn delivers_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = StateNotifier::new();
        notifier.subscribe(recorder(log.clone(), "a"));
        notifier.subscribe(recorder(log.clone(), "b"));

        notifier.notify(EventPayload::StateSaved { has_plan: false });
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:state_saved".to_string(), "b:state_saved".to_string()]
        );
    }

    #[test]
    fn failing_and_panicking_observers_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = StateNotifier::new();
        notifier.subscribe(Box::new(|_: &StateEvent| -> Result<(), StateError> {
            Err(StateError::ObserverError("boom".into()))
        }));
        notifier.subscribe(Box::new(|_: &StateEvent| -> Result<(), StateError> {
            panic!("observer bug")
        }));
        notifier.subscribe(recorder(log.clone(), "ok"));

        notifier.notify(EventPayload::StateCleared {});
        assert_eq!(*log.lock().unwrap(), vec!["ok:state_cleared".to_string()]);
    }

    #[test]
    fn unsubscribe_by_id() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut notifier = StateNotifier::new();
        let a = notifier.subscribe(recorder(log.clone(), "a"));
        notifier.subscribe(recorder(log.clone(), "b"));

        assert!(notifier.unsubscribe(a));
        assert!(!notifier.unsubscribe(a));
        assert_eq!(notifier.len(), 1);

        notifier.notify(EventPayload::StateLoaded { has_plan: true });
        assert_eq!(*log.lock().unwrap(), vec!["b:state_loaded".to_string()]);
    }

    #[test]
    fn jsonl_observer_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let observer = JsonlObserver::new(&path);

        observer
            .on_state_change(&StateEvent::new(EventPayload::DecisionAdded {
                preview: "Use SQLite".into(),
            }))
            .unwrap();
        observer
            .on_state_change(&StateEvent::new(EventPayload::StateCleared {}))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: StateEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type(), "decision_added");
    }

    #[test]
    fn jsonl_observer_reports_unwritable_log() {
        let dir = tempdir().unwrap();
        // The log path is a directory, so opening it for append fails.
        let observer = JsonlObserver::new(dir.path());

        let err = observer
            .on_state_change(&StateEvent::new(EventPayload::StateCleared {}))
            .unwrap_err();
        assert!(matches!(err, StateError::ObserverError(_)));
        assert!(err.to_string().contains("event log"));
    }
}
