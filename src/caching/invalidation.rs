//! # Cache Invalidation Module
//!
//! Deletes cached slot lists that a batch of reservations may have made
//! stale. A key is affected when its date range covers the reservation's
//! start date and it shares at least one test type with the reservation.
//!
//! Invalidation runs after the reservation already succeeded upstream, so it
//! is best-effort: scan and delete failures are logged and skipped.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::key::{filter_matching_keys, CacheKey};
use super::slot_cache::SlotCache;
use crate::core::types::{normalize_test_types, ReservationRequest};

/// What one invalidation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Distinct keys selected for deletion
    pub matched: usize,
    pub deleted: usize,
    /// Scans and deletes that errored
    pub failed: usize,
}

/// Reservation-driven slot cache invalidation
#[derive(Clone)]
pub struct ReservationInvalidator {
    cache: SlotCache,
    key_prefix: String,
}

impl ReservationInvalidator {
    pub fn new(cache: SlotCache, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    /// Delete every cached key that any of the reservations could affect
    ///
    /// Keys are collected across the whole batch first, so a key matched by
    /// several reservations is deleted once.
    pub async fn invalidate(&self, requests: &[ReservationRequest]) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        let mut seen = HashSet::new();
        let mut to_delete = Vec::new();

        for request in requests {
            let pattern = CacheKey::pattern(&self.key_prefix, &request.test_centre_id);
            let keys = match self.cache.scan_keys(&pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(
                        pattern = %pattern,
                        error = %e,
                        "Cache scan failed, skipping invalidation for this reservation"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let test_types = normalize_test_types(&request.test_types);
            let reserved_on = request.start_date_time.date_naive();

            for key in filter_matching_keys(&keys, &test_types, reserved_on) {
                if seen.insert(key.clone()) {
                    to_delete.push(key);
                }
            }
        }

        report.matched = to_delete.len();

        for key in &to_delete {
            match self.cache.delete(key).await {
                Ok(_) => {
                    debug!("Invalidated slot cache key: {}", key);
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete slot cache key");
                    report.failed += 1;
                }
            }
        }

        info!(
            reservations = requests.len(),
            matched = report.matched,
            deleted = report.deleted,
            failed = report.failed,
            "Slot cache invalidation finished"
        );

        report
    }
}
