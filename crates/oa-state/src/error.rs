// error.rs — Error types for the state engine.

use std::path::PathBuf;

use oa_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// No plan exists, or the named phase is not part of it.
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage medium could not be used. Not retried.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// A file I/O operation failed (config and event log files).
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize state or an event.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The engine config file is not valid TOML.
    #[error("invalid config at {path}: {source}")]
    InvalidConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// An observer rejected an event (logged, never propagated). Returned by
    /// `JsonlObserver` when the log cannot be written, and available to
    /// user-written observers.
    #[error("observer error: {0}")]
    ObserverError(String),
}

impl StateError {
    pub(crate) fn no_plan() -> Self {
        StateError::NotFound("no active plan; create a plan first".into())
    }

    pub(crate) fn phase_not_found(name: &str) -> Self {
        StateError::NotFound(format!("phase '{name}' not found in plan"))
    }
}
