//! Cache manager tying the two tiers together

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::memory::{CacheEntry, MemoryTier};
use super::store::{PersistentStore, StoredEntry};
use super::CacheError;

/// Cache sizing and defaults
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Memory tier capacity (default 500)
    pub max_entries: usize,

    /// TTL for writes that don't set one; `None` keeps them until evicted
    pub default_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl: Some(Duration::from_secs(300)),
        }
    }
}

/// Per-write options
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    ttl: Option<Duration>,
    tags: Vec<String>,
    persist: bool,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Also write to the persistent tier, if one is configured
    pub fn persist(mut self) -> Self {
        self.persist = true;
        self
    }
}

/// Counters since the manager was created
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Entries currently in the memory tier
    pub entries: usize,
    /// hits / (hits + misses), 0 when nothing was read
    pub hit_rate: f64,
}

pub struct CacheManager {
    memory: Mutex<MemoryTier>,
    persistent: Option<Arc<dyn PersistentStore>>,
    default_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheManager {
    /// Memory tier only
    pub fn new(config: CacheConfig) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(config.max_entries)),
            persistent: None,
            default_ttl: config.default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_persistent(config: CacheConfig, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            persistent: Some(store),
            ..Self::new(config)
        }
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_eviction(&self, evicted: Option<String>) {
        if let Some(key) = evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted least recently used cache entry");
        }
    }

    fn hit<T>(&self, value: T) -> Option<T> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    fn miss<T>(&self) -> Option<T> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Reads a value
    ///
    /// Expired entries, persistent-tier failures and values that don't
    /// decode as `T` all read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let cached = self.memory().get(key, now);

        if let Some(value) = cached {
            return match serde_json::from_value(value) {
                Ok(decoded) => self.hit(decoded),
                Err(e) => {
                    warn!(key = %key, error = %e, "Cached value has unexpected shape, dropping");
                    self.memory().remove(key);
                    self.miss()
                }
            };
        }

        let Some(store) = &self.persistent else {
            return self.miss();
        };

        let (stored, ttl) = match store.load(key).await {
            Ok(Some(found)) => found,
            Ok(None) => return self.miss(),
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent cache read failed");
                return self.miss();
            }
        };

        let decoded = match serde_json::from_value::<T>(stored.value.clone()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(key = %key, error = %e, "Persisted value has unexpected shape");
                return self.miss();
            }
        };

        let entry = CacheEntry::new(stored.value, ttl.map(|ttl| now + ttl), stored.tags);
        let evicted = self.memory().insert(key.to_string(), entry);
        self.record_eviction(evicted);
        debug!(key = %key, "Promoted persistent cache entry");

        self.hit(decoded)
    }

    /// Writes a value
    ///
    /// Only serialization fails the call; a persistent-tier failure is
    /// logged and the memory tier still holds the value.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: CacheOptions,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        let ttl = options.ttl.or(self.default_ttl);
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);

        let entry = CacheEntry::new(value.clone(), expires_at, options.tags.clone());
        let evicted = self.memory().insert(key.to_string(), entry);
        self.record_eviction(evicted);

        let Some(store) = &self.persistent else {
            return Ok(());
        };

        if options.persist {
            let stored = StoredEntry {
                value,
                tags: options.tags,
                created_at: Utc::now(),
            };
            if let Err(e) = store.save(key, &stored, ttl).await {
                warn!(key = %key, error = %e, "Persistent cache write failed");
            }
        } else if let Err(e) = store.remove(key).await {
            // An older persisted copy would be promoted after eviction
            warn!(key = %key, error = %e, "Persistent cache delete failed");
        }

        Ok(())
    }

    /// Returns the cached value or computes, stores and returns it
    ///
    /// Errors from `fetch` are passed through and nothing is cached.
    pub async fn get_or_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        options: CacheOptions,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = fetch().await?;
        if let Err(e) = self.set(key, &value, options).await {
            warn!(key = %key, error = %e, "Could not cache fetched value");
        }
        Ok(value)
    }

    /// Removes a key from both tiers; true if either held it
    pub async fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory().remove(key);

        let persisted = match &self.persistent {
            Some(store) => store.remove(key).await.unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Persistent cache delete failed");
                false
            }),
            None => false,
        };

        in_memory || persisted
    }

    /// True if a live entry exists in either tier; doesn't touch the stats
    pub async fn has(&self, key: &str) -> bool {
        if self.memory().contains(key, Instant::now()) {
            return true;
        }

        match &self.persistent {
            Some(store) => match store.load(key).await {
                Ok(found) => found.is_some(),
                Err(e) => {
                    warn!(key = %key, error = %e, "Persistent cache read failed");
                    false
                }
            },
            None => false,
        }
    }

    /// Drops every key tagged `tag` from both tiers
    ///
    /// Returns the number of distinct keys removed.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let mut removed: HashSet<String> = self.memory().remove_tagged(tag).into_iter().collect();

        if let Some(store) = &self.persistent {
            match store.remove_tag(tag).await {
                Ok(keys) => removed.extend(keys),
                Err(e) => warn!(tag = %tag, error = %e, "Persistent cache tag invalidation failed"),
            }
        }

        debug!(tag = %tag, removed = removed.len(), "Invalidated cache tag");
        removed.len()
    }

    /// Drops every key starting with `prefix` from both tiers
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed: HashSet<String> =
            self.memory().remove_prefixed(prefix).into_iter().collect();

        if let Some(store) = &self.persistent {
            match store.remove_prefix(prefix).await {
                Ok(keys) => removed.extend(keys),
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "Persistent cache prefix invalidation failed")
                }
            }
        }

        debug!(prefix = %prefix, removed = removed.len(), "Invalidated cache prefix");
        removed.len()
    }

    pub async fn clear(&self) {
        self.memory().clear();

        if let Some(store) = &self.persistent {
            if let Err(e) = store.clear().await {
                warn!(error = %e, "Persistent cache clear failed");
            }
        }
    }

    /// Purges expired memory entries; the persistent tier expires on its own
    pub fn cleanup_expired(&self) -> usize {
        self.memory().purge_expired(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.memory().len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Runs `cleanup_expired` every `every` until `cancel` fires
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let purged = cache.cleanup_expired();
                        if purged > 0 {
                            debug!(purged, "Purged expired cache entries");
                        }
                    }
                }
            }
        })
    }
}
