// state.rs — The working-memory aggregate.
//
// `AgentState` owns one storage backend and the in-memory document. Every
// mutation builds the next document on a copy, saves it, and only then
// commits it in memory, so a failed save or a NotFound leaves the aggregate
// exactly as it was.
//
// The aggregate takes `&mut self` for mutations and does no locking of its
// own; callers serialize access to a given instance.

use chrono::Utc;
use oa_storage::{is_empty_document, HistoryEntry, StorageBackend};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::events::{preview, EventPayload, ObserverId, StateNotifier, StateObserver};
use crate::migrate::{migrate_document, CURRENT_VERSION};
use crate::model::{
    Decision, ErrorLog, Note, PhaseStatus, PlanStatus, StateDocument, TaskPlan,
};

/// Snapshot returned by [`AgentState::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub has_plan: bool,
    pub plan: Option<TaskPlan>,
    pub notes_count: usize,
    pub decisions_count: usize,
    pub errors_count: usize,
    pub version: u32,

    /// Present only while a phase is in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,

    /// Percent of phases completed; present only alongside `current_phase`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

pub struct AgentState {
    storage: Box<dyn StorageBackend>,
    notifier: StateNotifier,
    doc: StateDocument,
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("storage", &self.storage.name())
            .field("notifier", &self.notifier)
            .field("doc", &self.doc)
            .finish()
    }
}

impl AgentState {
    /// Load (and migrate) whatever the backend holds.
    pub fn open(storage: Box<dyn StorageBackend>) -> Result<Self, StateError> {
        Self::with_notifier(storage, StateNotifier::new())
    }

    /// Like [`open`](Self::open), with observers already subscribed so they
    /// see the initial `state_loaded` event.
    pub fn with_notifier(
        storage: Box<dyn StorageBackend>,
        notifier: StateNotifier,
    ) -> Result<Self, StateError> {
        let doc = read_document(storage.as_ref())?;
        let state = Self {
            storage,
            notifier,
            doc,
        };
        tracing::debug!(
            backend = state.storage.name(),
            has_plan = state.doc.plan.is_some(),
            "loaded agent state"
        );
        state.notifier.notify(EventPayload::StateLoaded {
            has_plan: state.doc.plan.is_some(),
        });
        Ok(state)
    }

    // ── Plan and phases ─────────────────────────────────────────────

    /// Replace any existing plan with a new one whose phases are all pending.
    pub fn create_plan<S: AsRef<str>>(
        &mut self,
        goal: &str,
        phases: &[S],
    ) -> Result<TaskPlan, StateError> {
        let plan = TaskPlan::new(goal, phases);
        let mut next = self.doc.clone();
        next.plan = Some(plan.clone());
        self.commit(
            next,
            EventPayload::PlanCreated {
                goal: goal.to_string(),
                phases: plan.phases.len(),
            },
        )?;
        Ok(plan)
    }

    /// Make `name` the single in-progress phase. A phase restarted after an
    /// earlier start keeps its original `started_at`.
    pub fn start_phase(&mut self, name: &str) -> Result<TaskPlan, StateError> {
        let now = Utc::now();
        let mut next = self.doc.clone();
        let plan = next.plan.as_mut().ok_or_else(StateError::no_plan)?;
        let index = plan
            .phase_index(name)
            .ok_or_else(|| StateError::phase_not_found(name))?;

        for phase in plan.phases.iter_mut() {
            if phase.status == PhaseStatus::InProgress {
                phase.status = PhaseStatus::Pending;
            }
        }
        let phase = &mut plan.phases[index];
        phase.status = PhaseStatus::InProgress;
        phase.started_at.get_or_insert(now);
        plan.touch(now);

        let result = plan.clone();
        self.commit(
            next,
            EventPayload::PhaseStarted {
                phase: name.to_string(),
            },
        )?;
        Ok(result)
    }

    /// Complete `name` and promote the first pending phase, if any.
    ///
    /// Any other in-progress phase is returned to pending first, so at most
    /// one phase is in progress afterwards. When every phase is completed the
    /// plan itself becomes completed.
    pub fn complete_phase(&mut self, name: &str) -> Result<TaskPlan, StateError> {
        let now = Utc::now();
        let mut next = self.doc.clone();
        let plan = next.plan.as_mut().ok_or_else(StateError::no_plan)?;
        let index = plan
            .phase_index(name)
            .ok_or_else(|| StateError::phase_not_found(name))?;

        for (i, phase) in plan.phases.iter_mut().enumerate() {
            if i == index {
                phase.status = PhaseStatus::Completed;
                phase.completed_at = Some(now);
            } else if phase.status == PhaseStatus::InProgress {
                phase.status = PhaseStatus::Pending;
            }
        }

        let next_phase = plan.next_pending().map(|i| {
            let phase = &mut plan.phases[i];
            phase.status = PhaseStatus::InProgress;
            phase.started_at = Some(now);
            phase.name.clone()
        });
        if plan.completed_count() == plan.phases.len() {
            plan.status = PlanStatus::Completed;
        }
        plan.touch(now);

        let result = plan.clone();
        self.commit(
            next,
            EventPayload::PhaseCompleted {
                phase: name.to_string(),
                next_phase,
            },
        )?;
        Ok(result)
    }

    /// Mark `name` failed with `message`. Nothing is promoted.
    pub fn fail_phase(&mut self, name: &str, message: &str) -> Result<TaskPlan, StateError> {
        let now = Utc::now();
        let mut next = self.doc.clone();
        let plan = next.plan.as_mut().ok_or_else(StateError::no_plan)?;
        let index = plan
            .phase_index(name)
            .ok_or_else(|| StateError::phase_not_found(name))?;

        let phase = &mut plan.phases[index];
        phase.status = PhaseStatus::Failed;
        phase.completed_at = Some(now);
        phase.error_message = Some(message.to_string());
        plan.touch(now);

        let result = plan.clone();
        self.commit(
            next,
            EventPayload::PhaseFailed {
                phase: name.to_string(),
                error: message.to_string(),
            },
        )?;
        Ok(result)
    }

    pub fn plan(&self) -> Option<&TaskPlan> {
        self.doc.plan.as_ref()
    }

    // ── Journal ─────────────────────────────────────────────────────

    pub fn add_note(&mut self, content: &str, section: Option<&str>) -> Result<Note, StateError> {
        let note = Note {
            content: content.to_string(),
            section: section.map(str::to_string),
            created_at: Utc::now(),
        };
        let mut next = self.doc.clone();
        next.notes.push(note.clone());
        self.commit(
            next,
            EventPayload::NoteAdded {
                section: note.section.clone(),
                preview: preview(content),
            },
        )?;
        Ok(note)
    }

    pub fn add_decision(&mut self, decision: &str, rationale: &str) -> Result<Decision, StateError> {
        let record = Decision {
            decision: decision.to_string(),
            rationale: rationale.to_string(),
            created_at: Utc::now(),
        };
        let mut next = self.doc.clone();
        next.decisions.push(record.clone());
        self.commit(
            next,
            EventPayload::DecisionAdded {
                preview: preview(decision),
            },
        )?;
        Ok(record)
    }

    /// Record an error. `resolution` defaults to empty.
    pub fn log_error(&mut self, error: &str, resolution: Option<&str>) -> Result<ErrorLog, StateError> {
        let record = ErrorLog {
            error: error.to_string(),
            resolution: resolution.unwrap_or_default().to_string(),
            created_at: Utc::now(),
        };
        let mut next = self.doc.clone();
        next.errors.push(record.clone());
        self.commit(
            next,
            EventPayload::ErrorLogged {
                preview: preview(error),
            },
        )?;
        Ok(record)
    }

    /// Notes in insertion order, restricted to an exact `section` match when
    /// one is given. An empty section means no filter.
    pub fn notes(&self, section: Option<&str>) -> Vec<&Note> {
        let section = section.filter(|s| !s.is_empty());
        self.doc
            .notes
            .iter()
            .filter(|note| section.is_none() || note.section.as_deref() == section)
            .collect()
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.doc.decisions
    }

    pub fn errors(&self) -> &[ErrorLog] {
        &self.doc.errors
    }

    // ── Whole-state operations ──────────────────────────────────────

    pub fn status(&self) -> Status {
        let plan = self.doc.plan.as_ref();
        let current = plan.and_then(|p| p.current_phase().map(|phase| (p, phase)));
        Status {
            has_plan: plan.is_some(),
            plan: plan.cloned(),
            notes_count: self.doc.notes.len(),
            decisions_count: self.doc.decisions.len(),
            errors_count: self.doc.errors.len(),
            version: CURRENT_VERSION,
            current_phase: current.map(|(_, phase)| phase.name.clone()),
            progress: current.map(|(p, _)| p.progress()),
        }
    }

    /// Drop the plan and every journal entry, and clear the backend
    /// (including its history).
    pub fn clear(&mut self) -> Result<(), StateError> {
        self.storage.clear()?;
        self.doc = StateDocument::default();
        tracing::debug!(backend = self.storage.name(), "cleared agent state");
        self.notifier.notify(EventPayload::StateCleared {});
        Ok(())
    }

    /// Re-read the backend, discarding the in-memory document.
    pub fn reload(&mut self) -> Result<(), StateError> {
        self.doc = read_document(self.storage.as_ref())?;
        self.notifier.notify(EventPayload::StateReloaded {
            has_plan: self.doc.plan.is_some(),
        });
        Ok(())
    }

    /// Backend history, most recent first. Empty for backends without
    /// history.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StateError> {
        Ok(self.storage.history(limit)?)
    }

    pub fn supports_history(&self) -> bool {
        self.storage.supports_history()
    }

    /// Restore the document recorded as "prior" at history `index` and reload.
    /// Returns false when `index` is past the end of the history.
    pub fn rollback(&mut self, index: usize) -> Result<bool, StateError> {
        match self.storage.rollback(index)? {
            Some(_) => {
                self.reload()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn subscribe(&mut self, observer: Box<dyn StateObserver>) -> ObserverId {
        self.notifier.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub fn document(&self) -> &StateDocument {
        &self.doc
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.name()
    }

    fn commit(&mut self, mut next: StateDocument, event: EventPayload) -> Result<(), StateError> {
        next.version = CURRENT_VERSION;
        let value = serde_json::to_value(&next)?;
        self.storage.save(&value)?;
        self.doc = next;

        self.notifier.notify(EventPayload::StateSaved {
            has_plan: self.doc.plan.is_some(),
        });
        self.notifier.notify(event);
        Ok(())
    }
}

/// Load, migrate and decode. An absent, empty or undecodable document
/// yields a fresh one.
fn read_document(storage: &dyn StorageBackend) -> Result<StateDocument, StateError> {
    let Some(raw) = migrate_document(storage.load()?) else {
        return Ok(StateDocument::default());
    };
    if is_empty_document(&raw) {
        return Ok(StateDocument::default());
    }
    match serde_json::from_value::<StateDocument>(raw) {
        Ok(mut doc) => {
            doc.version = CURRENT_VERSION;
            Ok(doc)
        }
        Err(e) => {
            tracing::warn!(
                backend = storage.name(),
                error = %e,
                "stored state could not be decoded; starting fresh"
            );
            Ok(StateDocument::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oa_storage::{MemoryStorage, StorageError};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn fresh() -> AgentState {
        AgentState::open(Box::new(MemoryStorage::new())).unwrap()
    }

    fn statuses(plan: &TaskPlan) -> Vec<PhaseStatus> {
        plan.phases.iter().map(|p| p.status).collect()
    }

    /// Backend whose saves always fail.
    struct Unwritable;

    impl StorageBackend for Unwritable {
        fn save(&self, _document: &Value) -> Result<(), StorageError> {
            Err(StorageError::KeyValue("connection refused".into()))
        }
        fn load(&self) -> Result<Option<Value>, StorageError> {
            Ok(None)
        }
        fn exists(&self) -> Result<bool, StorageError> {
            Ok(false)
        }
        fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "unwritable"
        }
    }

    #[test]
    fn create_plan_persists() {
        let storage = Arc::new(MemoryStorage::new());
        let mut state = AgentState::open(Box::new(storage.clone())).unwrap();
        let plan = state
            .create_plan("Build API", &["Design", "Implement"])
            .unwrap();
        assert_eq!(plan.phases.len(), 2);

        let saved = storage.load().unwrap().unwrap();
        assert_eq!(saved["version"], 1);
        assert_eq!(saved["plan"]["goal"], "Build API");
        assert_eq!(saved["plan"]["phases"][0]["status"], "pending");
    }

    #[test]
    fn start_phase_demotes_previous() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b", "c"]).unwrap();
        state.start_phase("a").unwrap();
        let plan = state.start_phase("c").unwrap();
        assert_eq!(
            statuses(&plan),
            vec![PhaseStatus::Pending, PhaseStatus::Pending, PhaseStatus::InProgress]
        );
    }

    #[test]
    fn restart_keeps_original_start_time() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b"]).unwrap();
        let first = state.start_phase("a").unwrap().phases[0].started_at;
        state.start_phase("b").unwrap();
        let again = state.start_phase("a").unwrap().phases[0].started_at;
        assert!(first.is_some());
        assert_eq!(first, again);
    }

    #[test]
    fn start_unknown_phase_leaves_plan_untouched() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b"]).unwrap();
        state.start_phase("a").unwrap();
        let before = state.plan().cloned();

        let err = state.start_phase("Nonexistent").unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        assert_eq!(state.plan().cloned(), before);
    }

    #[test]
    fn phase_operations_without_plan_are_not_found() {
        let mut state = fresh();
        assert!(matches!(state.start_phase("a"), Err(StateError::NotFound(_))));
        assert!(matches!(state.complete_phase("a"), Err(StateError::NotFound(_))));
        assert!(matches!(
            state.fail_phase("a", "boom"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn complete_advances_to_next_pending() {
        let mut state = fresh();
        state
            .create_plan("Build API", &["Design", "Implement", "Test", "Deploy"])
            .unwrap();
        state.start_phase("Design").unwrap();
        let plan = state.complete_phase("Design").unwrap();

        assert_eq!(plan.phases[0].status, PhaseStatus::Completed);
        assert!(plan.phases[0].completed_at.is_some());
        assert_eq!(plan.phases[1].status, PhaseStatus::InProgress);
        assert!(plan.phases[1].started_at.is_some());

        let status = state.status();
        assert_eq!(status.current_phase.as_deref(), Some("Implement"));
        assert_eq!(status.progress, Some(25.0));
    }

    #[test]
    fn promoted_phase_starts_when_previous_completes() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b"]).unwrap();
        state.start_phase("b").unwrap();
        state.start_phase("a").unwrap();
        let plan = state.complete_phase("a").unwrap();

        assert_eq!(plan.phases[1].status, PhaseStatus::InProgress);
        assert!(plan.phases[1].started_at.is_some());
        assert_eq!(plan.phases[1].started_at, plan.phases[0].completed_at);
    }

    #[test]
    fn completing_last_phase_completes_plan() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b"]).unwrap();
        state.complete_phase("a").unwrap();
        let plan = state.complete_phase("b").unwrap();

        assert!(plan.current_phase().is_none());
        assert_eq!(plan.status, PlanStatus::Completed);
        let status = state.status();
        assert_eq!(status.current_phase, None);
        assert_eq!(status.progress, None);
    }

    #[test]
    fn completing_a_later_phase_keeps_one_in_progress() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b", "c"]).unwrap();
        state.start_phase("a").unwrap();
        let plan = state.complete_phase("c").unwrap();

        assert_eq!(
            statuses(&plan),
            vec![PhaseStatus::InProgress, PhaseStatus::Pending, PhaseStatus::Completed]
        );
    }

    #[test]
    fn fail_phase_records_message() {
        let mut state = fresh();
        state.create_plan("g", &["a", "b"]).unwrap();
        state.start_phase("a").unwrap();
        let plan = state.fail_phase("a", "tests failed").unwrap();

        assert_eq!(plan.phases[0].status, PhaseStatus::Failed);
        assert_eq!(plan.phases[0].error_message.as_deref(), Some("tests failed"));
        assert!(plan.phases[0].completed_at.is_some());
        assert_eq!(plan.phases[1].status, PhaseStatus::Pending);
    }

    #[test]
    fn create_plan_replaces_existing() {
        let mut state = fresh();
        state.create_plan("first", &["a"]).unwrap();
        state.start_phase("a").unwrap();
        state.create_plan("second", &["x", "y"]).unwrap();

        let plan = state.plan().unwrap();
        assert_eq!(plan.goal, "second");
        assert!(plan.current_phase().is_none());
    }

    #[test]
    fn notes_filter_by_exact_section() {
        let mut state = fresh();
        state.add_note("general note", None).unwrap();
        state.add_note("api note", Some("api")).unwrap();
        state.add_note("api v2 note", Some("api-v2")).unwrap();

        assert_eq!(state.notes(None).len(), 3);
        let api: Vec<_> = state.notes(Some("api")).iter().map(|n| n.content.clone()).collect();
        assert_eq!(api, vec!["api note".to_string()]);
        assert!(state.notes(Some("missing")).is_empty());
        assert_eq!(state.notes(Some("")).len(), 3);
    }

    #[test]
    fn decisions_and_errors_append_in_order() {
        let mut state = fresh();
        state.add_decision("Use SQLite", "embedded, no server").unwrap();
        state.add_decision("Use WAL", "concurrent readers").unwrap();
        let logged = state.log_error("timeout", None).unwrap();
        assert_eq!(logged.resolution, "");
        state.log_error("bad input", Some("validated")).unwrap();

        assert_eq!(state.decisions()[1].decision, "Use WAL");
        assert_eq!(state.errors()[1].resolution, "validated");
        let status = state.status();
        assert_eq!(status.decisions_count, 2);
        assert_eq!(status.errors_count, 2);
    }

    #[test]
    fn clear_resets_everything() {
        let storage = Arc::new(MemoryStorage::new());
        let mut state = AgentState::open(Box::new(storage.clone())).unwrap();
        state.create_plan("g", &["a"]).unwrap();
        state.add_note("n", None).unwrap();
        state.clear().unwrap();

        let status = serde_json::to_value(state.status()).unwrap();
        assert_eq!(
            status,
            json!({
                "has_plan": false,
                "plan": null,
                "notes_count": 0,
                "decisions_count": 0,
                "errors_count": 0,
                "version": 1
            })
        );
        assert!(!storage.exists().unwrap());
    }

    #[test]
    fn failed_save_leaves_state_unchanged() {
        let mut state = AgentState::open(Box::new(Unwritable)).unwrap();
        let err = state.create_plan("g", &["a"]).unwrap_err();
        assert!(matches!(err, StateError::StorageUnavailable(_)));
        assert!(state.plan().is_none());

        assert!(state.add_note("n", None).is_err());
        assert!(state.notes(None).is_empty());
    }

    #[test]
    fn updated_at_is_monotonic() {
        let mut state = fresh();
        let created = state.create_plan("g", &["a", "b"]).unwrap();
        let started = state.start_phase("a").unwrap();
        let completed = state.complete_phase("a").unwrap();
        assert!(started.updated_at >= created.updated_at);
        assert!(completed.updated_at >= started.updated_at);
        assert_eq!(completed.created_at, created.created_at);
    }

    #[test]
    fn legacy_document_is_migrated_on_open() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(&json!({
                "plan": {
                    "goal": "old",
                    "phases": [{"name": "a", "status": "running"}],
                    "created_at": "2024-01-01T09:00:00",
                    "updated_at": "2024-01-01T09:00:00",
                    "status": "active"
                }
            }))
            .unwrap();

        let state = AgentState::open(Box::new(storage)).unwrap();
        let plan = state.plan().unwrap();
        assert_eq!(plan.phases[0].status, PhaseStatus::Pending);
        assert_eq!(state.document().version, CURRENT_VERSION);
        assert!(state.notes(None).is_empty());
    }

    #[test]
    fn undecodable_document_starts_fresh() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(&json!({"version": 1, "plan": {"phases": "not a list"}}))
            .unwrap();
        let state = AgentState::open(Box::new(storage)).unwrap();
        assert!(!state.status().has_plan);
    }

    #[test]
    fn history_on_plain_backend_is_empty() {
        let mut state = fresh();
        state.create_plan("g", &["a"]).unwrap();
        assert!(!state.supports_history());
        assert!(state.history(10).unwrap().is_empty());
        assert!(matches!(
            state.rollback(0),
            Err(StateError::StorageUnavailable(StorageError::Unsupported { .. }))
        ));
    }
}
