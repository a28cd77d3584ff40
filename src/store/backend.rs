//! Raw store contract and its two implementations.
//!
//! The market engine only needs strings, sets, lists, and an atomic
//! counter. Redis provides all four natively; `MemoryBackend` mirrors the
//! same semantics in-process so engines can be tested without a server.
//! Failures surface to the caller; there is no hidden retry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::{BTreeSet, HashMap};

use crate::models::Config;

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Atomically increment an integer key, returning the new value.
    async fn incr(&self, key: &str) -> Result<u64>;
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    /// Full list contents in append order.
    async fn lrange(&self, key: &str) -> Result<Vec<String>>;
}

/// Redis-backed store using a multiplexed connection manager.
pub struct RedisBackend {
    manager: redis::aio::ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(config: &Config) -> Result<Self> {
        let auth = match (&config.store_username, &config.store_password) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            (None, Some(pass)) => format!(":{pass}@"),
            _ => String::new(),
        };
        let url = format!("redis://{auth}{}:{}", config.store_host, config.store_port);

        let client = redis::Client::open(url).context("invalid store URL")?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .context("failed to connect to store")?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.with_context(|| format!("GET {key}"))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set(key, value)
            .await
            .with_context(|| format!("SET {key}"))?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1u64)
            .await
            .with_context(|| format!("INCR {key}"))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .sadd(key, member)
            .await
            .with_context(|| format!("SADD {key}"))?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.smembers(key)
            .await
            .with_context(|| format!("SMEMBERS {key}"))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .rpush(key, value)
            .await
            .with_context(|| format!("RPUSH {key}"))?;
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.lrange(key, 0, -1)
            .await
            .with_context(|| format!("LRANGE {key}"))
    }
}

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    lists: HashMap<String, Vec<String>>,
}

/// In-process store with the same contract as Redis. Used by tests and for
/// running the service without an external store.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        let current = inner
            .strings
            .get(key)
            .map(|v| v.parse::<u64>())
            .transpose()
            .with_context(|| format!("INCR on non-integer key {key}"))?
            .unwrap_or(0);
        let next = current + 1;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.inner
            .lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.inner.lock().lists.get(key).cloned().unwrap_or_default())
    }
}
