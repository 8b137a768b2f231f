//! # oa-state
//!
//! The persistent working-memory engine for OpenAgent.
//!
//! An [`AgentState`] tracks a long-running task: a staged plan, free-form
//! notes, recorded decisions and logged errors. It owns one
//! [`oa_storage::StorageBackend`] and saves after every mutation, so the
//! backend always holds the durable copy.
//!
//! ## Key components
//!
//! - [`AgentState`] — the aggregate and its phase state machine
//!   (pending → in_progress → completed | failed)
//! - [`migrate_document`] — upgrades documents written by older versions
//! - [`StateNotifier`] / [`StateObserver`] — synchronous change events
//! - [`EngineConfig`] — backend selection from `.oa/config.toml`

pub mod config;
pub mod error;
pub mod events;
pub mod migrate;
pub mod model;
pub mod state;

pub use config::EngineConfig;
pub use error::StateError;
pub use events::{
    EventPayload, JsonlObserver, ObserverId, StateEvent, StateNotifier, StateObserver,
};
pub use migrate::{migrate_document, CURRENT_VERSION};
pub use model::{
    Decision, ErrorLog, Note, PhaseStatus, PlanStatus, StateDocument, TaskPhase, TaskPlan,
};
pub use state::{AgentState, Status};
