/// Redis integration
///
/// Cardify uses Redis only as the optional persistent tier of the cache
/// manager (see [`crate::cache::RedisStore`]). The client wraps a
/// `ConnectionManager`, which reconnects on its own.
///
/// # Example
///
/// ```no_run
/// use cardify_shared::redis::{RedisClient, RedisConfig};
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = RedisClient::new(RedisConfig::new("redis://localhost:6379")).await?;
/// println!("Redis healthy: {}", client.ping().await?);
/// # Ok(())
/// # }
/// ```

pub mod client;

pub use client::{sanitize_url, RedisClient, RedisClientError, RedisConfig};
