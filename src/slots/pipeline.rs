//! # Slot Retrieval Pipeline
//!
//! Cache-aside slot lookup for one region:
//!
//! 1. Build the cache key for the query
//! 2. Serve from the cache when caching is on and no preferred date was given
//! 3. Otherwise ask the provider
//! 4. Drop slots whose start time is not a canonical UTC instant
//! 5. Cache the KPI-stripped list when caching is on
//! 6. Return the filtered list with its KPI fields intact
//!
//! Cache failures are logged and never reach the caller.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use tracing::{debug, warn};

use super::splitter::split_into_week_long_requests;
use crate::caching::{CacheKey, SlotCache};
use crate::core::config::CachePolicy;
use crate::core::error::BrokerResult;
use crate::core::types::{Region, Slot, SlotQuery};
use crate::observability::telemetry::{properties, BusinessEvent, Telemetry};
use crate::upstream::BookingProvider;

/// True for `YYYY-MM-DDTHH:MM:SS.sssZ`, the only form that survives a
/// parse-and-format round trip unchanged
pub fn is_canonical_instant(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| {
            parsed
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                == value
        })
        .unwrap_or(false)
}

/// Keep only slots with a canonical start time
///
/// Every dropped slot is reported as a `SchedulingSlotInvalid` event.
pub fn remove_invalid_slots(slots: Vec<Slot>, telemetry: &dyn Telemetry) -> Vec<Slot> {
    slots
        .into_iter()
        .filter(|slot| {
            if is_canonical_instant(&slot.start_date_time) {
                return true;
            }
            telemetry.event(
                BusinessEvent::SchedulingSlotInvalid,
                "Slot date is not in ISO format",
                properties([
                    ("testCentreId", slot.test_centre_id.clone()),
                    ("startDateTime", slot.start_date_time.clone()),
                ]),
            );
            false
        })
        .collect()
}

/// Slot lookups with a read-through cache
#[derive(Clone)]
pub struct SlotService {
    provider: Arc<dyn BookingProvider>,
    cache: SlotCache,
    policy: CachePolicy,
    telemetry: Arc<dyn Telemetry>,
}

impl SlotService {
    pub fn new(
        provider: Arc<dyn BookingProvider>,
        cache: SlotCache,
        policy: CachePolicy,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            provider,
            cache,
            policy,
            telemetry,
        }
    }

    /// Slots for one query
    pub async fn retrieve_slots(&self, region: Region, query: &SlotQuery) -> BrokerResult<Vec<Slot>> {
        let key = CacheKey::for_query(self.policy.key_prefix(), query);
        let caching = self.policy.is_enabled(region);

        if caching && query.preferred_date.is_none() {
            match self.cache.get(&key).await {
                Ok(Some(slots)) => {
                    debug!(region = %region, key = %key, "Serving slots from cache");
                    return Ok(slots);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(region = %region, key = %key, error = %e, "Slot cache read failed, calling TCN");
                }
            }
        }

        let slots = self.provider.retrieve_slots(region, query).await?;
        let slots = remove_invalid_slots(slots, self.telemetry.as_ref());

        if caching {
            if let Err(e) = self.cache.set(&key, &slots, self.policy.ttl(region)).await {
                warn!(region = %region, key = %key, error = %e, "Slot cache write failed");
            }
        }

        Ok(slots)
    }

    /// Slots for a multi-week query, fetched one week at a time
    ///
    /// Sub-queries run concurrently. Results are concatenated in date order
    /// and the first failure fails the whole call.
    pub async fn retrieve_slots_by_week(
        &self,
        region: Region,
        query: &SlotQuery,
    ) -> BrokerResult<Vec<Slot>> {
        let requests = split_into_week_long_requests(query);
        debug!(region = %region, parts = requests.len(), "Split slot query into weeks");

        let results = try_join_all(
            requests
                .iter()
                .map(|request| self.retrieve_slots(region, request)),
        )
        .await?;

        Ok(results.into_iter().flatten().collect())
    }
}
