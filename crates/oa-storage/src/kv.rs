// kv.rs — The remote key-value seam.
//
// The key-value backends only need a handful of string and list commands.
// `KvClient` names exactly those, so the backends can run against a real
// Redis server (`RedisKvClient`) or against `MemoryKvClient`, which mimics
// the same command semantics in process.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::StorageError;

/// The commands a key-value medium must support.
///
/// List indices follow Redis conventions: inclusive ranges, negative
/// indices count from the end.
pub trait KvClient: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Set a string value, optionally expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Delete keys, returning how many existed.
    fn delete(&self, keys: &[&str]) -> Result<u64, StorageError>;

    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Increment an integer counter, creating it at 0 first. Returns the new
    /// value.
    fn incr(&self, key: &str) -> Result<u64, StorageError>;

    /// Push to the head of a list, returning the new length.
    fn lpush(&self, key: &str, value: &str) -> Result<u64, StorageError>;

    fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError>;

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError>;

    fn llen(&self, key: &str) -> Result<u64, StorageError>;

    /// Set an expiry on an existing key. Returns false if the key is absent.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Remaining time to live, or `None` when the key is absent or has no
    /// expiry.
    fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError>;

    fn ping(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
enum KvValue {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: KvValue,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process key-value store with Redis-compatible semantics.
///
/// Expired keys are purged lazily on access.
#[derive(Debug, Default)]
pub struct MemoryKvClient {
    entries: Mutex<HashMap<String, KvEntry>>,
}

impl MemoryKvClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, KvEntry>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        f(&mut entries)
    }
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::KeyValue(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

/// Resolve a Redis-style inclusive range against a list length.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

impl KvClient for MemoryKvClient {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(None),
            Some(KvEntry {
                value: KvValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                KvEntry {
                    value: KvValue::Str(value.to_string()),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            Ok(())
        })
    }

    fn delete(&self, keys: &[&str]) -> Result<u64, StorageError> {
        self.with_entries(|entries| {
            Ok(keys.iter().filter(|k| entries.remove(**k).is_some()).count() as u64)
        })
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.with_entries(|entries| Ok(entries.contains_key(key)))
    }

    fn incr(&self, key: &str) -> Result<u64, StorageError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| KvEntry {
                value: KvValue::Str("0".to_string()),
                expires_at: None,
            });
            let KvValue::Str(raw) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            let next = raw
                .parse::<u64>()
                .map_err(|_| {
                    StorageError::KeyValue(format!("value at '{key}' is not an integer"))
                })?
                + 1;
            *raw = next.to_string();
            Ok(next)
        })
    }

    fn lpush(&self, key: &str, value: &str) -> Result<u64, StorageError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| KvEntry {
                value: KvValue::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                KvValue::List(list) => {
                    list.push_front(value.to_string());
                    Ok(list.len() as u64)
                }
                KvValue::Str(_) => Err(wrong_type(key)),
            }
        })
    }

    fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        self.with_entries(|entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(());
            };
            let KvValue::List(list) = &mut entry.value else {
                return Err(wrong_type(key));
            };
            match resolve_range(list.len(), start, stop) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
                None => list.clear(),
            }
            if list.is_empty() {
                entries.remove(key);
            }
            Ok(())
        })
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(Vec::new()),
            Some(KvEntry {
                value: KvValue::List(list),
                ..
            }) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn llen(&self, key: &str) -> Result<u64, StorageError> {
        self.with_entries(|entries| match entries.get(key) {
            None => Ok(0),
            Some(KvEntry {
                value: KvValue::List(list),
                ..
            }) => Ok(list.len() as u64),
            Some(_) => Err(wrong_type(key)),
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        self.with_entries(|entries| {
            Ok(entries
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| at.saturating_duration_since(Instant::now())))
        })
    }

    fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
