//! # Cache Stores Module
//!
//! Key-value stores the slot cache sits on. Both speak plain strings with a
//! per-entry TTL and support glob-style key scans (`*` and `?`).

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::RedisCache;

use super::CacheResult;
use crate::core::config::{CacheBackend, CacheConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How often the in-memory backend drops expired entries
const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Set a value in the cache with TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a value from the cache, reporting whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Every live key matching a glob pattern
    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Perform health check
    async fn health_check(&self) -> CacheResult<bool>;
}

/// Open the store selected by the cache configuration
///
/// An unreachable Redis server is not an error: the store is returned
/// disconnected and every operation fails until Redis comes back.
pub async fn connect_store(config: &CacheConfig) -> CacheResult<Arc<dyn CacheStore>> {
    match config.backend {
        CacheBackend::Redis => {
            info!("Using Redis slot cache at {}", config.redis.url);
            Ok(Arc::new(RedisCache::new(config.redis.clone()).await?))
        }
        CacheBackend::Memory => {
            info!("Using in-memory slot cache");
            Ok(Arc::new(InMemoryCache::with_cleanup(MEMORY_PURGE_INTERVAL)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RedisConfig;

    #[tokio::test]
    async fn test_unreachable_redis_still_yields_store() {
        let config = CacheConfig {
            backend: CacheBackend::Redis,
            redis: RedisConfig {
                url: "redis://127.0.0.1:1".to_string(),
                max_retries: 0,
                retry_delay: Duration::from_millis(10),
            },
            ..CacheConfig::default()
        };

        let store = connect_store(&config).await.unwrap();

        assert!(store.get("key").await.is_err());
        assert!(!store.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let config = CacheConfig {
            backend: CacheBackend::Memory,
            ..CacheConfig::default()
        };

        let store = connect_store(&config).await.unwrap();
        store.set("key", "[]", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("key").await.unwrap(), Some("[]".to_string()));
        assert!(store.health_check().await.unwrap());
    }
}
