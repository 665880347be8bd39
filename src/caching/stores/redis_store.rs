//! # Redis Cache Store
//!
//! Redis-backed [`CacheStore`] using a shared connection manager, bounded
//! retries with reconnect, `SET EX` for TTLs and cursor `SCAN` for patterns.
//!
//! The store starts even when Redis is down. Operations fail with a
//! [`CacheError`] until a connection can be established, which is retried on
//! every call.

use super::CacheStore;
use crate::caching::{CacheError, CacheResult};
use crate::core::config::RedisConfig;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const SCAN_BATCH: usize = 1000;

/// Upper bound on one connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis cache implementation
pub struct RedisCache {
    config: RedisConfig,
    client: Client,

    /// `None` until the first successful connect. Replaced wholesale on
    /// reconnect; callers clone it out and never hold the lock across a command.
    connection_manager: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisCache {
    /// Create the store and try an initial connection
    ///
    /// Only a malformed URL is an error. An unreachable server is logged and
    /// the connection is attempted again on first use.
    pub async fn new(config: RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let connection = match Self::connect(&client).await {
            Ok(conn) => {
                info!("Redis cache connected to {}", config.url);
                Some(conn)
            }
            Err(e) => {
                warn!(
                    "Redis unavailable at {}, slot cache will connect on demand: {}",
                    config.url, e
                );
                None
            }
        };

        Ok(Self {
            config,
            client,
            connection_manager: Arc::new(RwLock::new(connection)),
        })
    }

    async fn connect(client: &Client) -> CacheResult<ConnectionManager> {
        match tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client.clone())).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Store {
                message: format!("connection attempt timed out after {:?}", CONNECT_TIMEOUT),
            }),
        }
    }

    /// Whether a connection has been established
    pub async fn is_connected(&self) -> bool {
        self.connection_manager.read().await.is_some()
    }

    /// A handle to the shared connection, connecting first if needed
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        if let Some(conn) = self.connection_manager.read().await.as_ref() {
            return Ok(conn.clone());
        }
        self.reconnect().await
    }

    /// Execute a Redis operation with retry logic
    async fn execute_with_retry<F, T>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn(&mut ConnectionManager) -> Pin<Box<dyn Future<Output = RedisResult<T>> + Send + '_>>
            + Send
            + Sync,
        T: Send,
    {
        let mut retries = 0;

        loop {
            let (failure, command_failed) = match self.connection().await {
                Ok(mut conn) => match operation(&mut conn).await {
                    Ok(value) => return Ok(value),
                    Err(e) => (CacheError::Redis(e), true),
                },
                Err(e) => (e, false),
            };

            error!("Redis operation failed: {}", failure);
            if retries >= self.config.max_retries {
                return Err(failure);
            }
            retries += 1;

            tokio::time::sleep(self.config.retry_delay * retries).await;

            // A failed connect is retried by `connection()` on the next pass
            if command_failed {
                if let Err(reconnect_err) = self.reconnect().await {
                    warn!("Failed to reconnect to Redis: {}", reconnect_err);
                }
            }
        }
    }

    async fn reconnect(&self) -> CacheResult<ConnectionManager> {
        let new_connection_manager = Self::connect(&self.client).await?;

        let mut conn = self.connection_manager.write().await;
        *conn = Some(new_connection_manager.clone());

        info!("Reconnected to Redis");
        Ok(new_connection_manager)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let value = self
            .execute_with_retry(|conn| {
                let key = key.to_string();
                Box::pin(async move { conn.get::<_, Option<String>>(&key).await })
            })
            .await?;

        match &value {
            Some(_) => debug!("Redis cache hit for key: {}", key),
            None => debug!("Redis cache miss for key: {}", key),
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        // SET EX rejects a zero expiry
        let ttl_seconds = ttl.as_secs().max(1);

        self.execute_with_retry(|conn| {
            let key = key.to_string();
            let value = value.to_string();
            Box::pin(async move { conn.set_ex::<_, _, ()>(&key, &value, ttl_seconds).await })
        })
        .await?;

        debug!("Set Redis cache key: {} with TTL: {}s", key, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let deleted_count: i64 = self
            .execute_with_retry(|conn| {
                let key = key.to_string();
                Box::pin(async move { conn.del(&key).await })
            })
            .await?;

        let was_deleted = deleted_count > 0;
        if was_deleted {
            debug!("Deleted Redis cache key: {}", key);
        }

        Ok(was_deleted)
    }

    async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let keys: Vec<String> = self
            .execute_with_retry(|conn| {
                let pattern = pattern.to_string();
                Box::pin(async move {
                    let mut cursor: u64 = 0;
                    let mut all_keys = Vec::new();

                    loop {
                        let (new_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_BATCH)
                            .query_async(conn)
                            .await?;

                        all_keys.extend(keys);

                        if new_cursor == 0 {
                            break;
                        }
                        cursor = new_cursor;
                    }

                    Ok::<Vec<String>, redis::RedisError>(all_keys)
                })
            })
            .await?;

        debug!("Redis scan for {} returned {} keys", pattern, keys.len());
        Ok(keys)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let result = self
            .execute_with_retry(|conn| {
                Box::pin(async move { redis::cmd("PING").query_async::<_, String>(conn).await })
            })
            .await;

        match result {
            Ok(response) => Ok(response == "PONG"),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_redis_cache() -> RedisCache {
        let url = std::env::var("BROKER_TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisCache::new(RedisConfig {
            url,
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
        })
        .await
        .unwrap()
    }

    fn unreachable() -> RedisConfig {
        RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_still_yields_store() {
        let cache = RedisCache::new(unreachable()).await.unwrap();
        assert!(!cache.is_connected().await);

        assert!(cache.get("key").await.is_err());
        assert!(cache.set("key", "[]", Duration::from_secs(60)).await.is_err());
        assert!(cache.scan_keys("*").await.is_err());
        assert!(!cache.health_check().await.unwrap());
        assert!(!cache.is_connected().await);
    }

    #[tokio::test]
    async fn test_malformed_url_is_rejected() {
        let config = RedisConfig {
            url: "not a redis url".to_string(),
            ..unreachable()
        };
        assert!(RedisCache::new(config).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis server
    async fn test_concurrent_commands_share_the_connection() {
        let cache = Arc::new(setup_redis_cache().await);
        let ttl = Duration::from_secs(60);
        let writes = (0..8).map(|i| {
            let cache = cache.clone();
            async move {
                cache
                    .set(&format!("redis-concurrent|{}", i), "[]", ttl)
                    .await
            }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let keys = cache.scan_keys("redis-concurrent|*").await.unwrap();
        assert_eq!(keys.len(), 8);
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis server
    async fn test_basic_operations() {
        let cache = setup_redis_cache().await;
        let key = "redis-test|availability|TC1|2021-01-01|2021-01-07|CAR";

        cache.set(key, "[]", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(key).await.unwrap(), Some("[]".to_string()));

        assert!(cache.delete(key).await.unwrap());
        assert_eq!(cache.get(key).await.unwrap(), None);
        assert!(!cache.delete(key).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis server
    async fn test_scan_keys() {
        let cache = setup_redis_cache().await;
        let ttl = Duration::from_secs(60);
        cache
            .set("redis-scan|availability|TC9|2021-01-01|2021-01-07|CAR", "[]", ttl)
            .await
            .unwrap();
        cache
            .set("redis-scan|availability|TC8|2021-01-01|2021-01-07|CAR", "[]", ttl)
            .await
            .unwrap();

        let keys = cache
            .scan_keys("redis-scan|availability|TC9|*|*")
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec!["redis-scan|availability|TC9|2021-01-01|2021-01-07|CAR".to_string()]
        );
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis server
    async fn test_health_check() {
        let cache = setup_redis_cache().await;
        assert!(cache.health_check().await.unwrap());
    }
}
