//! # Slot Cache
//!
//! Typed access to cached slot lists. Values are the JSON encoding of a
//! `Vec<Slot>`, always written without KPI fields.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::stores::CacheStore;
use super::CacheResult;
use crate::core::types::{remove_kpi_data, Slot};

/// JSON slot lists over a [`CacheStore`]
#[derive(Clone)]
pub struct SlotCache {
    store: Arc<dyn CacheStore>,
}

impl SlotCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Cached slots for a key, `None` on a miss
    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<Slot>>> {
        match self.store.get(key).await? {
            Some(raw) => {
                let slots: Vec<Slot> = serde_json::from_str(&raw)?;
                debug!("Slot cache hit for key: {} ({} slots)", key, slots.len());
                Ok(Some(slots))
            }
            None => {
                debug!("Slot cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    /// Store slots under a key, dropping KPI fields first
    ///
    /// An empty slice is a real "no availability" answer and is cached as such.
    pub async fn set(&self, key: &str, slots: &[Slot], ttl_seconds: u64) -> CacheResult<()> {
        let raw = serde_json::to_string(&remove_kpi_data(slots))?;
        self.store
            .set(key, &raw, Duration::from_secs(ttl_seconds))
            .await?;

        debug!(
            "Cached {} slots for key: {} with TTL: {}s",
            slots.len(),
            key,
            ttl_seconds
        );
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.store.delete(key).await
    }

    pub async fn scan_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.store.scan_keys(pattern).await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.store.health_check().await
    }
}
