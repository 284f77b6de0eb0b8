//! Persistent cache tier
//!
//! Entries written with `persist` survive a process restart. The tier is
//! pluggable: [`RedisStore`] in deployments, [`MemoryStore`] in tests and
//! single-process setups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::CacheError;
use crate::redis::RedisClient;

/// What the persistent tier stores for each key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: JsonValue,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Backing store for the persistent tier
///
/// Expiry is the store's job: `load` never returns an expired entry and
/// reports how much lifetime is left so promotion can keep it.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<(StoredEntry, Option<Duration>)>, CacheError>;

    async fn save(
        &self,
        key: &str,
        entry: &StoredEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Returns true if the key existed
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every key tagged with `tag` and returns those keys
    async fn remove_tag(&self, tag: &str) -> Result<Vec<String>, CacheError>;

    /// Removes every key starting with `prefix` and returns those keys
    async fn remove_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

/// In-process persistent tier
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (StoredEntry, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (StoredEntry, Option<Instant>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove_where(&self, pred: impl Fn(&str, &StoredEntry) -> bool) -> Vec<String> {
        let mut entries = self.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(k, (e, _))| pred(k, e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        keys
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<(StoredEntry, Option<Duration>)>, CacheError> {
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= now => {
                entries.remove(key);
                Ok(None)
            }
            Some((entry, expires_at)) => Ok(Some((
                entry.clone(),
                expires_at.map(|at| at.saturating_duration_since(now)),
            ))),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        key: &str,
        entry: &StoredEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock().insert(key.to_string(), (entry.clone(), expires_at));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn remove_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.remove_where(|_, entry| entry.tags.iter().any(|t| t == tag)))
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.remove_where(|key, _| key.starts_with(prefix)))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.lock().clear();
        Ok(())
    }
}

/// Redis-backed persistent tier
///
/// Layout under the client's key prefix:
///
/// ```text
/// entry:{key}   JSON StoredEntry, with PX expiry when a TTL is set
/// tag:{tag}     SET of keys carrying the tag
/// keys          SET of every key written
/// tags          SET of every tag written
/// ```
pub struct RedisStore {
    client: RedisClient,
}

impl RedisStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    fn entry_key(&self, key: &str) -> String {
        self.client.key(&format!("entry:{}", key))
    }

    fn tag_key(&self, tag: &str) -> String {
        self.client.key(&format!("tag:{}", tag))
    }

    fn keys_index(&self) -> String {
        self.client.key("keys")
    }

    fn tags_index(&self) -> String {
        self.client.key("tags")
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        let timeout = self.client.command_timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(timeout))?
            .map_err(CacheError::from)
    }

    /// Splits index members into live keys and keys whose entry expired
    async fn split_live(&self, keys: Vec<String>) -> Result<(Vec<String>, Vec<String>), CacheError> {
        if keys.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut conn = self.client.get_connection();
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.exists(self.entry_key(key));
        }
        let exists: Vec<bool> = self.timed(pipe.query_async(&mut conn)).await?;

        let (live, stale): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .zip(exists)
            .partition(|(_, exists)| *exists);
        Ok((
            live.into_iter().map(|(k, _)| k).collect(),
            stale.into_iter().map(|(k, _)| k).collect(),
        ))
    }

    /// Drops keys that expired through `PX` from the key and tag indexes
    async fn prune_index(&self, stale: &[String]) -> Result<(), CacheError> {
        if stale.is_empty() {
            return Ok(());
        }

        let mut conn = self.client.get_connection();
        let tags: Vec<String> = self.timed(conn.smembers(self.tags_index())).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.srem(self.keys_index(), stale).ignore();
        for tag in &tags {
            pipe.srem(self.tag_key(tag), stale).ignore();
        }
        self.timed(pipe.query_async::<_, ()>(&mut conn)).await?;

        tracing::debug!(pruned = stale.len(), "Pruned expired keys from cache index");
        Ok(())
    }

    /// Deletes the given cache keys and drops them from the index
    async fn purge(&self, keys: &[String], extra: Option<(&str, &str)>) -> Result<(), CacheError> {
        let mut conn = self.client.get_connection();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for key in keys {
            pipe.del(self.entry_key(key)).ignore();
            pipe.srem(self.keys_index(), key).ignore();
        }
        if let Some((tag_key, tag)) = extra {
            pipe.del(tag_key).ignore();
            pipe.srem(self.tags_index(), tag).ignore();
        }

        self.timed(pipe.query_async::<_, ()>(&mut conn)).await
    }
}

#[async_trait]
impl PersistentStore for RedisStore {
    async fn load(&self, key: &str) -> Result<Option<(StoredEntry, Option<Duration>)>, CacheError> {
        let mut conn = self.client.get_connection();
        let entry_key = self.entry_key(key);

        let (payload, pttl): (Option<String>, i64) = self
            .timed(
                redis::pipe()
                    .get(&entry_key)
                    .cmd("PTTL")
                    .arg(&entry_key)
                    .query_async(&mut conn),
            )
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let entry: StoredEntry = serde_json::from_str(&payload)?;
        // PTTL is -1 for keys without expiry
        let ttl = (pttl > 0).then(|| Duration::from_millis(pttl as u64));
        Ok(Some((entry, ttl)))
    }

    async fn save(
        &self,
        key: &str,
        entry: &StoredEntry,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(entry)?;
        let entry_key = self.entry_key(key);
        let mut conn = self.client.get_connection();

        let mut pipe = redis::pipe();
        pipe.atomic();
        match ttl {
            Some(ttl) => {
                let ms = ttl.as_millis().max(1) as u64;
                pipe.cmd("SET").arg(&entry_key).arg(payload).arg("PX").arg(ms).ignore();
            }
            None => {
                pipe.cmd("SET").arg(&entry_key).arg(payload).ignore();
            }
        }
        pipe.sadd(self.keys_index(), key).ignore();
        for tag in &entry.tags {
            pipe.sadd(self.tag_key(tag), key).ignore();
            pipe.sadd(self.tags_index(), tag).ignore();
        }

        self.timed(pipe.query_async::<_, ()>(&mut conn)).await
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.get_connection();
        let (removed,): (i64,) = self
            .timed(
                redis::pipe()
                    .atomic()
                    .del(self.entry_key(key))
                    .srem(self.keys_index(), key)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(removed > 0)
    }

    async fn remove_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        let tag_key = self.tag_key(tag);
        let mut conn = self.client.get_connection();
        let members: Vec<String> = self.timed(conn.smembers(&tag_key)).await?;

        let (live, stale) = self.split_live(members).await?;

        self.purge(&live, Some((tag_key.as_str(), tag))).await?;
        self.prune_index(&stale).await?;
        Ok(live)
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.client.get_connection();
        let all: Vec<String> = self.timed(conn.smembers(self.keys_index())).await?;
        let (live, stale) = self.split_live(all).await?;
        self.prune_index(&stale).await?;

        let keys: Vec<String> = live.into_iter().filter(|k| k.starts_with(prefix)).collect();
        if !keys.is_empty() {
            self.purge(&keys, None).await?;
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_connection();
        let keys: Vec<String> = self.timed(conn.smembers(self.keys_index())).await?;
        let tags: Vec<String> = self.timed(conn.smembers(self.tags_index())).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in &keys {
            pipe.del(self.entry_key(key)).ignore();
        }
        for tag in &tags {
            pipe.del(self.tag_key(tag)).ignore();
        }
        pipe.del(self.keys_index()).ignore();
        pipe.del(self.tags_index()).ignore();

        self.timed(pipe.query_async::<_, ()>(&mut conn)).await
    }
}
