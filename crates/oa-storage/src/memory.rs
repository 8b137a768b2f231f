// memory.rs — In-memory backend for tests and ephemeral sessions.

use std::sync::RwLock;

use serde_json::Value;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// Keeps the document in process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    document: RwLock<Option<Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let mut slot = self
            .document
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *slot = Some(document.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        let slot = self
            .document
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(slot.clone())
    }

    fn exists(&self) -> Result<bool, StorageError> {
        let slot = self
            .document
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(slot.is_some())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut slot = self
            .document
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        *slot = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_load_clear() {
        let storage = MemoryStorage::new();
        assert!(!storage.exists().unwrap());
        assert!(storage.load().unwrap().is_none());

        storage.save(&json!({"goal": "x"})).unwrap();
        assert!(storage.exists().unwrap());
        assert_eq!(storage.load().unwrap(), Some(json!({"goal": "x"})));

        storage.clear().unwrap();
        assert!(!storage.exists().unwrap());
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn loaded_copy_is_detached() {
        let storage = MemoryStorage::new();
        storage.save(&json!({"notes": []})).unwrap();

        let mut loaded = storage.load().unwrap().unwrap();
        loaded["notes"] = json!(["mutated"]);

        assert_eq!(storage.load().unwrap(), Some(json!({"notes": []})));
    }

    #[test]
    fn history_is_empty_and_rollback_unsupported() {
        let storage = MemoryStorage::new();
        storage.save(&json!({"a": 1})).unwrap();
        assert!(storage.history(10).unwrap().is_empty());
        assert!(!storage.supports_history());
        assert!(matches!(
            storage.rollback(0),
            Err(StorageError::Unsupported { .. })
        ));
    }
}
