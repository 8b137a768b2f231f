// kv_store.rs — Backends over a remote key-value store.
//
// Keys (with the default prefix):
//   openagent:state    string, the JSON document (optional TTL)
//   openagent:history  list of JSON history entries, newest at the head
//   openagent:version  save counter for the history backend
//
// Single-key SET is atomic on the server, which is all the cross-process
// safety these backends promise. Within a process, `write_lock` serializes
// the read-modify-write sequence of a history save.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::backend::{HistoryEntry, StorageBackend};
use crate::error::StorageError;
use crate::kv::KvClient;

pub const DEFAULT_KEY_PREFIX: &str = "openagent:";

/// Stores the document as a single string key.
pub struct KvStorage {
    client: Arc<dyn KvClient>,
    key_prefix: String,
    state_key: String,
    ttl: Option<Duration>,
    write_lock: Mutex<()>,
}

impl KvStorage {
    pub fn new(client: Arc<dyn KvClient>, key_prefix: impl Into<String>) -> Self {
        let key_prefix = key_prefix.into();
        Self {
            client,
            state_key: format!("{key_prefix}state"),
            key_prefix,
            ttl: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Expire the document `ttl` after each save.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn state_key(&self) -> &str {
        &self.state_key
    }

    /// Remaining lifetime of the stored document, if it has one.
    pub fn ttl_remaining(&self) -> Result<Option<Duration>, StorageError> {
        self.client.ttl(&self.state_key)
    }

    /// Whether the store is reachable.
    pub fn ping(&self) -> bool {
        match self.client.ping() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "key-value ping failed");
                false
            }
        }
    }

    fn write_document(&self, document: &Value) -> Result<(), StorageError> {
        let json = serde_json::to_string(document)?;
        self.client.set(&self.state_key, &json, self.ttl)?;
        tracing::debug!(key = %self.state_key, bytes = json.len(), "saved key-value document");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, StorageError> {
        self.write_lock.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl StorageBackend for KvStorage {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let _guard = self.lock()?;
        self.write_document(document)
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        let Some(json) = self.client.get(&self.state_key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(document) => Ok(Some(document)),
            Err(e) => {
                tracing::warn!(
                    key = %self.state_key,
                    error = %e,
                    "stored value is not valid JSON; treating as empty"
                );
                Ok(None)
            }
        }
    }

    fn exists(&self) -> Result<bool, StorageError> {
        self.client.exists(&self.state_key)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock()?;
        self.client.delete(&[&self.state_key])?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "kv"
    }
}

/// Key-value backend that pushes one history entry per save.
pub struct KvStorageWithHistory {
    inner: KvStorage,
    history_key: String,
    version_key: String,
    max_history: usize,
    history_ttl: Option<Duration>,
}

impl KvStorageWithHistory {
    pub fn new(client: Arc<dyn KvClient>, key_prefix: impl Into<String>, max_history: usize) -> Self {
        let inner = KvStorage::new(client, key_prefix);
        Self {
            history_key: format!("{}history", inner.key_prefix),
            version_key: format!("{}version", inner.key_prefix),
            inner,
            max_history,
            history_ttl: None,
        }
    }

    /// Expire the document `ttl` after each save.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.inner.ttl = ttl;
        self
    }

    /// Expire the whole history list `ttl` after each save, independent of
    /// the document's own expiry.
    pub fn with_history_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.history_ttl = ttl;
        self
    }

    pub fn history_key(&self) -> &str {
        &self.history_key
    }

    pub fn history_count(&self) -> Result<u64, StorageError> {
        self.inner.client.llen(&self.history_key)
    }

    pub fn ttl_remaining(&self) -> Result<Option<Duration>, StorageError> {
        self.inner.ttl_remaining()
    }

    pub fn ping(&self) -> bool {
        self.inner.ping()
    }

    /// Advance the save counter. It lives under its own key, so trimming or
    /// expiring the history list never resets it; only `clear` does.
    fn next_version(&self) -> Result<u64, StorageError> {
        self.inner.client.incr(&self.version_key)
    }

    fn append_history(&self, entry: &HistoryEntry) -> Result<(), StorageError> {
        let client = &self.inner.client;
        if self.max_history == 0 {
            client.delete(&[&self.history_key])?;
            return Ok(());
        }
        client.lpush(&self.history_key, &serde_json::to_string(entry)?)?;
        let stop = i64::try_from(self.max_history - 1).unwrap_or(i64::MAX);
        client.ltrim(&self.history_key, 0, stop)?;
        if let Some(ttl) = self.history_ttl {
            client.expire(&self.history_key, ttl)?;
        }
        Ok(())
    }
}

impl StorageBackend for KvStorageWithHistory {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let _guard = self.inner.lock()?;
        let old_data = self.inner.load()?;
        let version = self.next_version()?;

        self.inner.write_document(document)?;

        let entry = HistoryEntry::new(old_data, document.clone(), version);
        self.append_history(&entry)?;
        tracing::debug!(
            key = %self.history_key,
            version,
            change_kind = %entry.change_kind,
            "recorded key-value history"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        self.inner.load()
    }

    fn exists(&self) -> Result<bool, StorageError> {
        self.inner.exists()
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.inner.lock()?;
        self.inner
            .client
            .delete(&[&self.inner.state_key, &self.history_key, &self.version_key])?;
        Ok(())
    }

    fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit - 1).unwrap_or(i64::MAX);
        let raw = self.inner.client.lrange(&self.history_key, 0, stop)?;

        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<HistoryEntry>(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(key = %self.history_key, error = %e, "skipping unreadable history entry")
                }
            }
        }
        Ok(entries)
    }

    fn supports_history(&self) -> bool {
        true
    }

    fn rollback(&self, index: usize) -> Result<Option<Value>, StorageError> {
        let history = self.history(index.saturating_add(1))?;
        let Some(entry) = history.get(index) else {
            return Ok(None);
        };
        let target = entry.rollback_target();
        self.save(&target)?;
        tracing::info!(index, version = entry.version, "rolled back key-value document");
        Ok(Some(target))
    }

    fn name(&self) -> &'static str {
        "kv-history"
    }
}
