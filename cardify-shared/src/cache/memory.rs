//! Bounded in-process tier
//!
//! Not synchronized; [`super::CacheManager`] keeps it behind a mutex.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tokio::time::Instant;

/// Cached value with its bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: JsonValue,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<Instant>,
    pub tags: Vec<String>,
    pub hits: u64,
    /// Logical clock value of the last read or write
    pub last_access: u64,
}

impl CacheEntry {
    pub fn new(value: JsonValue, expires_at: Option<Instant>, tags: Vec<String>) -> Self {
        Self {
            value,
            created_at: Utc::now(),
            expires_at,
            tags,
            hits: 0,
            last_access: 0,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

pub struct MemoryTier {
    max_entries: usize,
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

impl MemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns a live entry's value and marks it recently used
    ///
    /// An expired entry is removed and reads as a miss.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<JsonValue> {
        if self.entries.get(key)?.is_expired(now) {
            self.entries.remove(key);
            return None;
        }

        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.hits += 1;
        entry.last_access = tick;
        Some(entry.value.clone())
    }

    pub fn contains(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .map_or(false, |entry| !entry.is_expired(now))
    }

    /// Stores an entry, evicting the least recently used one when full
    ///
    /// Returns the evicted key, if any.
    pub fn insert(&mut self, key: String, mut entry: CacheEntry) -> Option<String> {
        let mut evicted = None;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            evicted = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(victim) = &evicted {
                self.entries.remove(victim);
            }
        }

        entry.last_access = self.tick();
        self.entries.insert(key, entry);
        evicted
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry carrying `tag` and returns their keys
    pub fn remove_tagged(&mut self, tag: &str) -> Vec<String> {
        self.remove_where(|_, entry| entry.tags.iter().any(|t| t == tag))
    }

    /// Removes every entry whose key starts with `prefix` and returns their keys
    pub fn remove_prefixed(&mut self, prefix: &str) -> Vec<String> {
        self.remove_where(|key, _| key.starts_with(prefix))
    }

    /// Drops expired entries and returns how many went
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        self.remove_where(|_, entry| entry.is_expired(now)).len()
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&str, &CacheEntry) -> bool) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, e)| pred(k, e))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
