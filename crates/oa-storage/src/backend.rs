// backend.rs — The StorageBackend contract and history entry model.
//
// A backend owns exactly one logical document (the serialized working
// memory aggregate) in its own medium. Documents cross this boundary as raw
// JSON values so that callers can migrate old layouts before decoding them
// into typed structs.
//
// All methods take `&self`: backends are shared between request handlers,
// so each one serializes its own writes internally.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Trait for persisting and retrieving the working-memory document.
///
/// Implementations must make `save` atomic for a single writer: a concurrent
/// `load` observes either the previous document or the new one, never a
/// partial write.
pub trait StorageBackend: Send + Sync {
    /// Replace the persisted document.
    fn save(&self, document: &Value) -> Result<(), StorageError>;

    /// Load the persisted document. Returns `Ok(None)` when nothing is stored
    /// or the stored bytes cannot be decoded.
    fn load(&self) -> Result<Option<Value>, StorageError>;

    /// Whether a document is currently stored.
    fn exists(&self) -> Result<bool, StorageError>;

    /// Remove the document and any history recorded for it.
    fn clear(&self) -> Result<(), StorageError>;

    /// Recorded history, most recent first. Backends without history
    /// return an empty list.
    fn history(&self, _limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        Ok(Vec::new())
    }

    /// Whether `history` and `rollback` are meaningful for this backend.
    fn supports_history(&self) -> bool {
        false
    }

    /// Re-save the document recorded as "prior" at history `index`
    /// (0 = most recent). Returns the restored document, or `None` when the
    /// index is past the end of the history.
    fn rollback(&self, _index: usize) -> Result<Option<Value>, StorageError> {
        Err(StorageError::Unsupported {
            backend: self.name(),
            operation: "rollback",
        })
    }

    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        (**self).save(document)
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        (**self).load()
    }

    fn exists(&self) -> Result<bool, StorageError> {
        (**self).exists()
    }

    fn clear(&self) -> Result<(), StorageError> {
        (**self).clear()
    }

    fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        (**self).history(limit)
    }

    fn supports_history(&self) -> bool {
        (**self).supports_history()
    }

    fn rollback(&self, index: usize) -> Result<Option<Value>, StorageError> {
        (**self).rollback(index)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        (**self).save(document)
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        (**self).load()
    }

    fn exists(&self) -> Result<bool, StorageError> {
        (**self).exists()
    }

    fn clear(&self) -> Result<(), StorageError> {
        (**self).clear()
    }

    fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        (**self).history(limit)
    }

    fn supports_history(&self) -> bool {
        (**self).supports_history()
    }

    fn rollback(&self, index: usize) -> Result<Option<Value>, StorageError> {
        (**self).rollback(index)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// What a save did to the stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// No document existed before this save.
    Create,
    /// An existing document was replaced.
    Update,
    /// The new document is empty.
    Clear,
}

impl ChangeKind {
    /// Classify a save from the prior document (if any) and the new one.
    pub fn classify(prior: Option<&Value>, new: &Value) -> Self {
        if prior.is_none() {
            ChangeKind::Create
        } else if is_empty_document(new) {
            ChangeKind::Clear
        } else {
            ChangeKind::Update
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Clear => "clear",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeKind::Create),
            "update" => Some(ChangeKind::Update),
            "clear" => Some(ChangeKind::Clear),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded save on a history-capable backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The document written by this save.
    pub data: Value,

    /// The document that was replaced, or `None` for a `create`.
    pub old_data: Option<Value>,

    /// Monotonic save counter for the stored key.
    pub version: u64,

    /// When the save happened.
    pub created_at: DateTime<Utc>,

    pub change_kind: ChangeKind,
}

impl HistoryEntry {
    pub fn new(old_data: Option<Value>, data: Value, version: u64) -> Self {
        let change_kind = ChangeKind::classify(old_data.as_ref(), &data);
        Self {
            data,
            old_data,
            version,
            created_at: Utc::now(),
            change_kind,
        }
    }

    /// The document a rollback to this entry restores.
    pub fn rollback_target(&self) -> Value {
        self.old_data
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// A document is empty when it is `null` or an object with no fields.
pub fn is_empty_document(document: &Value) -> bool {
    match document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
