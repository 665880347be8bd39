//! # Caching System Module
//!
//! Slot availability caching on top of a key-value store.
//!
//! ## Features
//! - Structured cache keys encoding test centre, date range and test types
//! - Range-and-type matching of keys against a reservation
//! - Redis and in-memory stores behind one [`CacheStore`] trait
//! - Typed slot cache that never persists KPI fields
//! - Best-effort invalidation after reservations
//!
//! ## Architecture
//! 1. **Key codec** (`key`): build, parse and match cache keys
//! 2. **Stores** (`stores`): Redis and in-memory implementations
//! 3. **Slot cache** (`slot_cache`): JSON slot lists over a store
//! 4. **Invalidation** (`invalidation`): reservation-driven deletes

pub mod invalidation;
pub mod key;
pub mod slot_cache;
pub mod stores;

pub use invalidation::{InvalidationReport, ReservationInvalidator};
pub use key::{filter_matching_keys, key_matches, CacheKey, MalformedKey, ParsedKey};
pub use slot_cache::SlotCache;
pub use stores::{connect_store, CacheStore, InMemoryCache, RedisCache};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
///
/// These never leave the slot pipeline or the invalidator: every call site
/// logs them and carries on as if the cache operation had not happened.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid scan pattern: {0}")]
    Pattern(#[from] regex::Error),
}
