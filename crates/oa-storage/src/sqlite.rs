// sqlite.rs — Transactional SQLite backends, with and without history.
//
// Each call opens its own connection so reads never queue behind the
// in-process write lock; SQLite's WAL mode lets readers proceed while a
// writer commits. Writes are serialized per backend instance by
// `write_lock`, and across processes by SQLite's own locking (bounded by
// `busy_timeout`).
//
// Table layout (names configurable):
//   agent_state         (key PK, data, version, created_at, updated_at)
//   agent_state_history (id AUTOINCREMENT, key, data, old_data, version,
//                        created_at, change_kind)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use crate::backend::{ChangeKind, HistoryEntry, StorageBackend};
use crate::error::StorageError;

pub const DEFAULT_TABLE: &str = "agent_state";
pub const DEFAULT_HISTORY_TABLE: &str = "agent_state_history";
pub const DEFAULT_KEY: &str = "state";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_HISTORY: usize = 1000;

/// Stores the document as one row in a SQLite table.
#[derive(Debug)]
pub struct SqliteStorage {
    path: PathBuf,
    table: String,
    key: String,
    timeout: Duration,
    write_lock: Mutex<()>,
}

impl SqliteStorage {
    /// Open (or create) a database with the default table, key and timeout.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_options(path, DEFAULT_TABLE, DEFAULT_KEY, DEFAULT_TIMEOUT)
    }

    /// Open (or create) a database with an explicit table name, row key and
    /// busy timeout.
    pub fn with_options(
        path: impl AsRef<Path>,
        table: &str,
        key: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        validate_identifier(table)?;
        let storage = Self {
            path: path.as_ref().to_path_buf(),
            table: table.to_string(),
            key: key.to_string(),
            timeout,
            write_lock: Mutex::new(()),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.connect()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{t}_updated_at ON {t}(updated_at);",
            t = self.table
        ))
        .map_err(|e| self.sql_err(e))
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::io(parent, source))?;
        }
        let conn = Connection::open(&self.path).map_err(|e| self.sql_err(e))?;
        conn.busy_timeout(self.timeout)
            .map_err(|e| self.sql_err(e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| self.sql_err(e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| self.sql_err(e))?;
        Ok(conn)
    }

    fn sql_err(&self, source: rusqlite::Error) -> StorageError {
        StorageError::Sqlite {
            path: self.path.clone(),
            source,
        }
    }

    /// Read the stored row as (raw JSON text, version).
    fn read_row(&self, conn: &Connection) -> Result<Option<(String, i64)>, StorageError> {
        conn.query_row(
            &format!("SELECT data, version FROM {} WHERE key = ?1", self.table),
            params![self.key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| self.sql_err(e))
    }

    fn upsert(
        &self,
        conn: &Connection,
        json: &str,
        version: i64,
        now: &str,
    ) -> Result<(), StorageError> {
        conn.execute(
            &format!(
                "INSERT INTO {t} (key, data, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     data = excluded.data,
                     version = excluded.version,
                     updated_at = excluded.updated_at",
                t = self.table
            ),
            params![self.key, json, version, now],
        )
        .map_err(|e| self.sql_err(e))?;
        Ok(())
    }

    fn parse_document(&self, raw: &str) -> Option<Value> {
        match serde_json::from_str(raw) {
            Ok(document) => Some(document),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    table = %self.table,
                    error = %e,
                    "stored row is not valid JSON; treating as empty"
                );
                None
            }
        }
    }
}

impl StorageBackend for SqliteStorage {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let json = serde_json::to_string(document)?;
        let now = Utc::now().to_rfc3339();
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| self.sql_err(e))?;
        let version = self.read_row(&tx)?.map(|(_, v)| v + 1).unwrap_or(1);
        self.upsert(&tx, &json, version, &now)?;
        tx.commit().map_err(|e| self.sql_err(e))?;

        tracing::debug!(path = %self.path.display(), version, "saved sqlite document");
        Ok(())
    }

    fn load(&self) -> Result<Option<Value>, StorageError> {
        let conn = self.connect()?;
        Ok(self
            .read_row(&conn)?
            .and_then(|(raw, _)| self.parse_document(&raw)))
    }

    fn exists(&self) -> Result<bool, StorageError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("SELECT 1 FROM {} WHERE key = ?1 LIMIT 1", self.table),
            params![self.key],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(|e| self.sql_err(e))
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        let conn = self.connect()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.table),
            params![self.key],
        )
        .map_err(|e| self.sql_err(e))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// SQLite backend that records one history row per save.
///
/// Reading the prior document, writing the new one, appending history and
/// trimming it all happen in a single IMMEDIATE transaction.
#[derive(Debug)]
pub struct SqliteStorageWithHistory {
    inner: SqliteStorage,
    history_table: String,
    max_history: usize,
}

impl SqliteStorageWithHistory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::with_options(
            path,
            DEFAULT_TABLE,
            DEFAULT_HISTORY_TABLE,
            DEFAULT_KEY,
            DEFAULT_MAX_HISTORY,
            DEFAULT_TIMEOUT,
        )
    }

    pub fn with_options(
        path: impl AsRef<Path>,
        table: &str,
        history_table: &str,
        key: &str,
        max_history: usize,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        validate_identifier(history_table)?;
        let inner = SqliteStorage::with_options(path, table, key, timeout)?;
        let storage = Self {
            inner,
            history_table: history_table.to_string(),
            max_history,
        };
        storage.init_history_schema()?;
        Ok(storage)
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    fn init_history_schema(&self) -> Result<(), StorageError> {
        let conn = self.inner.connect()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {h} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                data TEXT NOT NULL,
                old_data TEXT,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                change_kind TEXT NOT NULL DEFAULT 'update'
            );
            CREATE INDEX IF NOT EXISTS idx_{h}_key ON {h}(key, id);",
            h = self.history_table
        ))
        .map_err(|e| self.inner.sql_err(e))
    }

    fn row_to_entry(
        &self,
        data: String,
        old_data: Option<String>,
        version: i64,
        created_at: String,
        change_kind: String,
    ) -> Option<HistoryEntry> {
        let data = serde_json::from_str(&data).ok()?;
        let old_data = match old_data {
            Some(raw) => Some(serde_json::from_str(&raw).ok()?),
            None => None,
        };
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .ok()?
            .with_timezone(&Utc);
        let change_kind = ChangeKind::parse(&change_kind)?;
        Some(HistoryEntry {
            data,
            old_data,
            version: u64::try_from(version).unwrap_or(0),
            created_at,
            change_kind,
        })
    }
}

impl StorageBackend for SqliteStorageWithHistory {
    fn save(&self, document: &Value) -> Result<(), StorageError> {
        let inner = &self.inner;
        let json = serde_json::to_string(document)?;
        let now = Utc::now().to_rfc3339();
        let _guard = inner
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut conn = inner.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| inner.sql_err(e))?;

        let prior = inner.read_row(&tx)?;
        let had_row = prior.is_some();
        let version = prior.as_ref().map(|(_, v)| v + 1).unwrap_or(1);
        let old_data = prior.and_then(|(raw, _)| inner.parse_document(&raw));
        // An unreadable prior row still counts as an existing document.
        let unreadable = Value::Null;
        let change_kind = ChangeKind::classify(
            old_data.as_ref().or(had_row.then_some(&unreadable)),
            document,
        );
        let old_json = old_data.as_ref().map(serde_json::to_string).transpose()?;

        inner.upsert(&tx, &json, version, &now)?;

        tx.execute(
            &format!(
                "INSERT INTO {h} (key, data, old_data, version, created_at, change_kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                h = self.history_table
            ),
            params![inner.key, json, old_json, version, now, change_kind.as_str()],
        )
        .map_err(|e| inner.sql_err(e))?;

        tx.execute(
            &format!(
                "DELETE FROM {h}
                 WHERE key = ?1 AND id NOT IN (
                     SELECT id FROM {h} WHERE key = ?1 ORDER BY id DESC LIMIT ?2
                 )",
                h = self.history_table
            ),
            params![inner.key, i64::try_from(self.max_history).unwrap_or(i64::MAX)],
        )
        .map_err(|e| inner.sql_err(e))?;

        tx.commit().map_err(|e| inner.sql_err(e))?;

        tracing::debug!(
            path = %inner.path.display(),
            version,
            change_kind = %change_kind,
            "saved sqlite document with history"
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
        let inner = &self.inner;
        let _guard = inner
            .write_lock
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        let mut conn = inner.connect()?;
        let tx = conn.transaction().map_err(|e| inner.sql_err(e))?;
        tx.execute(
            &format!("DELETE FROM {} WHERE key = ?1", inner.table),
            params![inner.key],
        )
        .map_err(|e| inner.sql_err(e))?;
        tx.execute(
            &format!("DELETE FROM {} WHERE key = ?1", self.history_table),
            params![inner.key],
        )
        .map_err(|e| inner.sql_err(e))?;
        tx.commit().map_err(|e| inner.sql_err(e))
    }

    fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        let inner = &self.inner;
        let conn = inner.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT data, old_data, version, created_at, change_kind
                 FROM {h} WHERE key = ?1 ORDER BY id DESC LIMIT ?2",
                h = self.history_table
            ))
            .map_err(|e| inner.sql_err(e))?;

        let rows = stmt
            .query_map(
                params![inner.key, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .map_err(|e| inner.sql_err(e))?;

        let mut entries = Vec::new();
        for row in rows {
            let (data, old_data, version, created_at, change_kind) =
                row.map_err(|e| inner.sql_err(e))?;
            match self.row_to_entry(data, old_data, version, created_at, change_kind) {
                Some(entry) => entries.push(entry),
                None => tracing::warn!(
                    path = %inner.path.display(),
                    version,
                    "skipping unreadable history row"
                ),
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
        tracing::info!(index, version = entry.version, "rolled back sqlite document");
        Ok(Some(target))
    }

    fn name(&self) -> &'static str {
        "sqlite-history"
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_identifier(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidConfig(format!(
            "'{name}' is not a valid SQL table name"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn basic_operations() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path().join("state.db")).unwrap();

        assert!(!storage.exists().unwrap());
        assert!(storage.load().unwrap().is_none());

        let doc = json!({"version": 1, "plan": {"goal": "Test"}});
        storage.save(&doc).unwrap();
        assert!(storage.exists().unwrap());
        assert_eq!(storage.load().unwrap(), Some(doc));

        storage.clear().unwrap();
        assert!(!storage.exists().unwrap());
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.save(&json!({"persistent": true})).unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.load().unwrap(), Some(json!({"persistent": true})));
    }

    #[test]
    fn separate_keys_do_not_collide() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let a = SqliteStorage::with_options(&path, DEFAULT_TABLE, "a", DEFAULT_TIMEOUT).unwrap();
        let b = SqliteStorage::with_options(&path, DEFAULT_TABLE, "b", DEFAULT_TIMEOUT).unwrap();

        a.save(&json!({"who": "a"})).unwrap();
        b.save(&json!({"who": "b"})).unwrap();
        a.clear().unwrap();

        assert!(a.load().unwrap().is_none());
        assert_eq!(b.load().unwrap(), Some(json!({"who": "b"})));
    }

    #[test]
    fn non_json_row_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let storage = SqliteStorage::open(&path).unwrap();
        storage.save(&json!({"a": 1})).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE agent_state SET data = 'garbage' WHERE key = 'state'", [])
            .unwrap();

        assert!(storage.load().unwrap().is_none());
        assert!(storage.exists().unwrap());
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let dir = tempdir().unwrap();
        let result = SqliteStorage::with_options(
            dir.path().join("state.db"),
            "state; DROP TABLE x",
            DEFAULT_KEY,
            DEFAULT_TIMEOUT,
        );
        assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
        assert!(validate_identifier("agent_state_2").is_ok());
        assert!(validate_identifier("2state").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn history_records_every_save() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();

        storage.save(&json!({"step": 1})).unwrap();
        storage.save(&json!({"step": 2})).unwrap();
        storage.save(&json!({"step": 3})).unwrap();

        let history = storage.history(10).unwrap();
        assert_eq!(history.len(), 3);

        // Most recent first.
        assert_eq!(history[0].data, json!({"step": 3}));
        assert_eq!(history[0].old_data, Some(json!({"step": 2})));
        assert_eq!(history[0].change_kind, ChangeKind::Update);
        assert_eq!(history[0].version, 3);

        assert_eq!(history[2].old_data, None);
        assert_eq!(history[2].change_kind, ChangeKind::Create);
        assert_eq!(history[2].version, 1);
    }

    #[test]
    fn save_over_unreadable_row_is_an_update() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let storage = SqliteStorageWithHistory::open(&path).unwrap();
        storage.save(&json!({"step": 1})).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE agent_state SET data = 'garbage' WHERE key = 'state'", [])
            .unwrap();

        storage.save(&json!({"step": 2})).unwrap();
        let history = storage.history(10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].change_kind, ChangeKind::Update);
        assert_eq!(history[0].old_data, None);
        assert_eq!(history[0].version, 2);
    }

    #[test]
    fn history_is_trimmed_to_max() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::with_options(
            dir.path().join("state.db"),
            DEFAULT_TABLE,
            DEFAULT_HISTORY_TABLE,
            DEFAULT_KEY,
            3,
            DEFAULT_TIMEOUT,
        )
        .unwrap();

        for i in 0..10 {
            storage.save(&json!({"i": i})).unwrap();
        }

        let history = storage.history(100).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].data, json!({"i": 9}));
        assert_eq!(history[2].data, json!({"i": 7}));
    }

    #[test]
    fn history_limit_is_respected() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();
        for i in 0..5 {
            storage.save(&json!({"i": i})).unwrap();
        }
        assert_eq!(storage.history(2).unwrap().len(), 2);
    }

    #[test]
    fn empty_save_is_tagged_clear() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();
        storage.save(&json!({"a": 1})).unwrap();
        storage.save(&json!({})).unwrap();

        let history = storage.history(1).unwrap();
        assert_eq!(history[0].change_kind, ChangeKind::Clear);
    }

    #[test]
    fn clear_removes_history_and_restarts_versions() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();
        storage.save(&json!({"a": 1})).unwrap();
        storage.save(&json!({"a": 2})).unwrap();

        storage.clear().unwrap();
        assert!(storage.history(10).unwrap().is_empty());
        assert!(!storage.exists().unwrap());

        storage.save(&json!({"a": 3})).unwrap();
        let history = storage.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change_kind, ChangeKind::Create);
        assert_eq!(history[0].version, 1);
    }

    #[test]
    fn rollback_restores_prior_as_forward_save() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();
        storage.save(&json!({"step": 1})).unwrap();
        storage.save(&json!({"step": 2})).unwrap();

        let restored = storage.rollback(0).unwrap();
        assert_eq!(restored, Some(json!({"step": 1})));
        assert_eq!(storage.load().unwrap(), Some(json!({"step": 1})));

        let history = storage.history(10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].old_data, Some(json!({"step": 2})));
    }

    #[test]
    fn rollback_out_of_range_is_none() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();
        storage.save(&json!({"step": 1})).unwrap();
        assert_eq!(storage.rollback(5).unwrap(), None);
        assert_eq!(storage.history(10).unwrap().len(), 1);
    }

    #[test]
    fn rollback_of_create_saves_empty_document() {
        let dir = tempdir().unwrap();
        let storage = SqliteStorageWithHistory::open(dir.path().join("state.db")).unwrap();
        storage.save(&json!({"step": 1})).unwrap();

        assert_eq!(storage.rollback(0).unwrap(), Some(json!({})));
        assert_eq!(storage.history(1).unwrap()[0].change_kind, ChangeKind::Clear);
    }
}
