//! # oa-storage
//!
//! Durable storage for the OpenAgent working-memory document.
//!
//! Every backend persists exactly one JSON document behind the
//! [`StorageBackend`] trait. History-capable backends also keep a bounded log
//! of prior/new document pairs and can roll back to any of them.
//!
//! ## Backends
//!
//! - [`MemoryStorage`] — process-local, for tests and ephemeral sessions
//! - [`JsonFileStorage`] — a pretty-printed JSON file, replaced atomically
//! - [`SqliteStorage`] / [`SqliteStorageWithHistory`] — a row in an embedded
//!   SQLite database (WAL mode), optionally with a history table
//! - [`KvStorage`] / [`KvStorageWithHistory`] — a remote key-value store
//!   reached through the [`KvClient`] seam
//! - [`EncryptedJsonStorage`] — AES-256-GCM encrypted file with a
//!   password-derived key
//!
//! [`StorageConfig`] selects and builds one of them from configuration.

pub mod backend;
pub mod config;
pub mod encrypted;
pub mod error;
pub mod json_file;
pub mod kv;
pub mod kv_store;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_client;
pub mod sqlite;

pub use backend::{is_empty_document, ChangeKind, HistoryEntry, StorageBackend};
pub use config::{EncryptedConfig, JsonConfig, KvConfig, SqliteConfig, StorageConfig};
pub use encrypted::{generate_password, EncryptedJsonStorage};
pub use error::StorageError;
pub use json_file::JsonFileStorage;
pub use kv::{KvClient, MemoryKvClient};
pub use kv_store::{KvStorage, KvStorageWithHistory};
pub use memory::MemoryStorage;
#[cfg(feature = "redis")]
pub use redis_client::RedisKvClient;
pub use sqlite::{SqliteStorage, SqliteStorageWithHistory};
