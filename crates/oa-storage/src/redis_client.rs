// redis_client.rs — KvClient over a real Redis server.
//
// Connections come from an r2d2 pool. Every checkout applies the configured
// read/write timeout so a stalled server fails the call instead of hanging it.

use std::time::Duration;

use r2d2::{Pool, PooledConnection};

use crate::error::StorageError;
use crate::kv::KvClient;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_SIZE: u32 = 8;

/// Pooled Redis client.
pub struct RedisKvClient {
    pool: Pool<redis::Client>,
    timeout: Duration,
}

impl std::fmt::Debug for RedisKvClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKvClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisKvClient {
    /// Build a client for `url` (e.g. `redis://host:6379/0`).
    ///
    /// No connection is made until the first command.
    pub fn connect(url: &str, timeout: Duration) -> Result<Self, StorageError> {
        let client = redis::Client::open(url).map_err(kv_err)?;
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .min_idle(Some(0))
            .connection_timeout(timeout)
            .build(client)
            .map_err(|e| StorageError::KeyValue(format!("redis pool: {e}")))?;
        Ok(Self { pool, timeout })
    }

    fn conn(&self) -> Result<PooledConnection<redis::Client>, StorageError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| StorageError::KeyValue(format!("redis unavailable: {e}")))?;
        conn.set_read_timeout(Some(self.timeout)).map_err(kv_err)?;
        conn.set_write_timeout(Some(self.timeout)).map_err(kv_err)?;
        Ok(conn)
    }

    fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, StorageError> {
        let mut conn = self.conn()?;
        cmd.query(&mut *conn).map_err(kv_err)
    }
}

fn kv_err(e: redis::RedisError) -> StorageError {
    StorageError::KeyValue(e.to_string())
}

fn secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl KvClient for RedisKvClient {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.query(redis::cmd("GET").arg(key))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError> {
        match ttl {
            Some(ttl) => self.query(redis::cmd("SETEX").arg(key).arg(secs(ttl)).arg(value)),
            None => self.query(redis::cmd("SET").arg(key).arg(value)),
        }
    }

    fn delete(&self, keys: &[&str]) -> Result<u64, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys))
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let count: u64 = self.query(redis::cmd("EXISTS").arg(key))?;
        Ok(count > 0)
    }

    fn incr(&self, key: &str) -> Result<u64, StorageError> {
        self.query(redis::cmd("INCR").arg(key))
    }

    fn lpush(&self, key: &str, value: &str) -> Result<u64, StorageError> {
        self.query(redis::cmd("LPUSH").arg(key).arg(value))
    }

    fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StorageError> {
        self.query(redis::cmd("LTRIM").arg(key).arg(start).arg(stop))
    }

    fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
    }

    fn llen(&self, key: &str) -> Result<u64, StorageError> {
        self.query(redis::cmd("LLEN").arg(key))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let set: i64 = self.query(redis::cmd("EXPIRE").arg(key).arg(secs(ttl)))?;
        Ok(set == 1)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>, StorageError> {
        // -1: no expiry, -2: no such key.
        let ttl: i64 = self.query(redis::cmd("TTL").arg(key))?;
        Ok(u64::try_from(ttl).ok().map(Duration::from_secs))
    }

    fn ping(&self) -> Result<(), StorageError> {
        let _: String = self.query(&redis::cmd("PING"))?;
        Ok(())
    }
}
