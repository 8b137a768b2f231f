// error.rs — Error types for the storage subsystem.
//
// Every variant here means the medium could not be used. A document that
// exists but cannot be parsed is not an error: backends report it as
// "no document" and log a warning instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to a storage medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize a document before writing it.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The SQLite database could not be opened or queried.
    #[error("sqlite error at {path}: {source}")]
    Sqlite {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// The remote key-value store was unreachable or rejected a command.
    #[error("key-value store error: {0}")]
    KeyValue(String),

    /// Key derivation or encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// The backend configuration is unusable.
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// The operation is only offered by history-capable backends.
    #[error("{backend} backend does not support {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// A thread panicked while holding this backend's lock.
    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::IoError {
            path: path.into(),
            source,
        }
    }
}
