//! Storage backend configuration.
//!
//! Selected by the `backend` tag, e.g. in TOML:
//!
//! ```toml
//! [storage]
//! backend = "sqlite"
//! path = ".oa/state.db"
//! history = true
//! max_history = 200
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::StorageBackend;
use crate::encrypted::{EncryptedJsonStorage, DEFAULT_PBKDF2_ITERATIONS};
use crate::error::StorageError;
use crate::json_file::JsonFileStorage;
use crate::memory::MemoryStorage;
use crate::sqlite::{
    SqliteStorage, SqliteStorageWithHistory, DEFAULT_HISTORY_TABLE, DEFAULT_KEY,
    DEFAULT_MAX_HISTORY, DEFAULT_TABLE,
};

/// Which backend to use and how to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Process-local, lost on exit.
    Memory,
    Json(JsonConfig),
    Sqlite(SqliteConfig),
    /// Remote key-value store (Redis).
    Kv(KvConfig),
    Encrypted(EncryptedConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Json(JsonConfig::default())
    }
}

/// JSON file backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonConfig {
    /// Document path, relative to the workspace root unless absolute
    #[serde(default = "default_json_path")]
    pub path: PathBuf,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            path: default_json_path(),
        }
    }
}

/// SQLite backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,

    #[serde(default = "default_table")]
    pub table: String,

    /// Row key inside the table
    #[serde(default = "default_key")]
    pub key: String,

    /// Record every save in a history table
    #[serde(default)]
    pub history: bool,

    #[serde(default = "default_history_table")]
    pub history_table: String,

    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Busy timeout while waiting for another writer
    #[serde(default = "default_sqlite_timeout")]
    pub timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            table: default_table(),
            key: default_key(),
            history: false,
            history_table: default_history_table(),
            max_history: default_max_history(),
            timeout_secs: default_sqlite_timeout(),
        }
    }
}

/// Remote key-value backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "default_kv_url")]
    pub url: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expire the document this long after each save
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    #[serde(default)]
    pub history: bool,

    #[serde(default = "default_kv_max_history")]
    pub max_history: usize,

    /// Expire the history list this long after each save
    #[serde(default)]
    pub history_ttl_secs: Option<u64>,

    /// Connect, read and write timeout
    #[serde(default = "default_kv_timeout")]
    pub timeout_secs: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: default_kv_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: None,
            history: false,
            max_history: default_kv_max_history(),
            history_ttl_secs: None,
            timeout_secs: default_kv_timeout(),
        }
    }
}

/// Encrypted JSON backend configuration.
///
/// The password is read from the environment variable named by
/// `password_env`; it is never stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedConfig {
    #[serde(default = "default_encrypted_path")]
    pub path: PathBuf,

    #[serde(default = "default_password_env")]
    pub password_env: String,

    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl Default for EncryptedConfig {
    fn default() -> Self {
        Self {
            path: default_encrypted_path(),
            password_env: default_password_env(),
            iterations: default_iterations(),
        }
    }
}

fn default_json_path() -> PathBuf {
    PathBuf::from(".agent_state.json")
}
fn default_sqlite_path() -> PathBuf {
    PathBuf::from(".agent_state.db")
}
fn default_encrypted_path() -> PathBuf {
    PathBuf::from(".agent_state.enc")
}
fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}
fn default_key() -> String {
    DEFAULT_KEY.to_string()
}
fn default_history_table() -> String {
    DEFAULT_HISTORY_TABLE.to_string()
}
fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}
fn default_sqlite_timeout() -> u64 {
    30
}
fn default_kv_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
fn default_key_prefix() -> String {
    crate::kv_store::DEFAULT_KEY_PREFIX.to_string()
}
fn default_kv_max_history() -> usize {
    100
}
fn default_kv_timeout() -> u64 {
    5
}
fn default_password_env() -> String {
    "OA_STATE_PASSWORD".to_string()
}
fn default_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

impl StorageConfig {
    /// Short name of the selected backend.
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Memory => "memory",
            StorageConfig::Json(_) => "json",
            StorageConfig::Sqlite(c) if c.history => "sqlite-history",
            StorageConfig::Sqlite(_) => "sqlite",
            StorageConfig::Kv(c) if c.history => "kv-history",
            StorageConfig::Kv(_) => "kv",
            StorageConfig::Encrypted(_) => "encrypted",
        }
    }

    /// Build the configured backend. Relative paths resolve against
    /// `base_dir`.
    pub fn open(&self, base_dir: &Path) -> Result<Box<dyn StorageBackend>, StorageError> {
        let backend: Box<dyn StorageBackend> = match self {
            StorageConfig::Memory => Box::new(MemoryStorage::new()),
            StorageConfig::Json(c) => Box::new(JsonFileStorage::new(resolve(base_dir, &c.path))),
            StorageConfig::Sqlite(c) => {
                let path = resolve(base_dir, &c.path);
                let timeout = Duration::from_secs(c.timeout_secs);
                if c.history {
                    Box::new(SqliteStorageWithHistory::with_options(
                        path,
                        &c.table,
                        &c.history_table,
                        &c.key,
                        c.max_history,
                        timeout,
                    )?)
                } else {
                    Box::new(SqliteStorage::with_options(path, &c.table, &c.key, timeout)?)
                }
            }
            StorageConfig::Kv(c) => open_kv(c)?,
            StorageConfig::Encrypted(c) => {
                let password = std::env::var(&c.password_env).map_err(|_| {
                    StorageError::InvalidConfig(format!(
                        "environment variable {} must hold the encryption password",
                        c.password_env
                    ))
                })?;
                Box::new(EncryptedJsonStorage::with_iterations(
                    resolve(base_dir, &c.path),
                    &password,
                    c.iterations,
                )?)
            }
        };
        tracing::debug!(backend = backend.name(), "opened storage backend");
        Ok(backend)
    }
}

#[cfg(feature = "redis")]
fn open_kv(c: &KvConfig) -> Result<Box<dyn StorageBackend>, StorageError> {
    use std::sync::Arc;

    use crate::kv_store::{KvStorage, KvStorageWithHistory};
    use crate::redis_client::RedisKvClient;

    let client = Arc::new(RedisKvClient::connect(
        &c.url,
        Duration::from_secs(c.timeout_secs),
    )?);
    let ttl = c.ttl_secs.map(Duration::from_secs);
    Ok(if c.history {
        Box::new(
            KvStorageWithHistory::new(client, c.key_prefix.clone(), c.max_history)
                .with_ttl(ttl)
                .with_history_ttl(c.history_ttl_secs.map(Duration::from_secs)),
        )
    } else {
        Box::new(KvStorage::new(client, c.key_prefix.clone()).with_ttl(ttl))
    })
}

#[cfg(not(feature = "redis"))]
fn open_kv(_c: &KvConfig) -> Result<Box<dyn StorageBackend>, StorageError> {
    Err(StorageError::InvalidConfig(
        "the kv backend requires the `redis` feature".into(),
    ))
}
