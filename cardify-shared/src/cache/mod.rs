//! Two-tier cache with TTLs and tag invalidation
//!
//! Reads check the bounded in-memory tier first, then the optional
//! persistent tier, promoting persistent hits back into memory. Writes can
//! carry tags so one call drops every related key from both tiers.
//!
//! # Example
//!
//! ```no_run
//! use cardify_shared::cache::{CacheConfig, CacheManager, CacheOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), cardify_shared::cache::CacheError> {
//! let cache = CacheManager::new(CacheConfig::default());
//!
//! cache
//!     .set("card:42", &"Bakery", CacheOptions::new().ttl(Duration::from_secs(60)).tag("cards"))
//!     .await?;
//! assert_eq!(cache.get::<String>("card:42").await.as_deref(), Some("Bakery"));
//!
//! cache.invalidate_tag("cards").await;
//! assert!(!cache.has("card:42").await);
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod memory;
pub mod store;

pub use manager::{CacheConfig, CacheManager, CacheOptions, CacheStats};
pub use memory::CacheEntry;
pub use store::{MemoryStore, PersistentStore, RedisStore, StoredEntry};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Cache store timed out after {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Store(err.to_string())
    }
}
