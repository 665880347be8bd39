//! # Reservations and Booking Confirmation
//!
//! Forwards reservation and booking writes to the provider and keeps the slot
//! cache honest afterwards: once a reservation succeeds, every cached slot
//! list it could have changed is invalidated.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::caching::ReservationInvalidator;
use crate::core::config::CachePolicy;
use crate::core::error::BrokerResult;
use crate::core::types::{BookingRequest, BookingResponse, Region, Reservation, ReservationRequest};
use crate::observability::telemetry::{properties, BusinessEvent, Telemetry};
use crate::upstream::BookingProvider;

const CONFIRMED_STATUS: &str = "200";

/// Booking references whose reservation is missing from the responses or
/// came back with a non-200 status
pub fn missing_booking_reference_ids(
    requests: &[BookingRequest],
    responses: &[BookingResponse],
) -> Vec<String> {
    let answered: HashSet<&str> = responses
        .iter()
        .map(|r| r.reservation_id.as_str())
        .collect();
    let failed: HashSet<&str> = responses
        .iter()
        .filter(|r| r.status != CONFIRMED_STATUS)
        .map(|r| r.reservation_id.as_str())
        .collect();

    requests
        .iter()
        .filter(|request| {
            let id = request.reservation_id.as_str();
            !answered.contains(id) || failed.contains(id)
        })
        .map(|request| request.booking_reference_id.clone())
        .collect()
}

/// Reservation and booking writes
#[derive(Clone)]
pub struct ReservationService {
    provider: Arc<dyn BookingProvider>,
    invalidator: ReservationInvalidator,
    policy: CachePolicy,
    telemetry: Arc<dyn Telemetry>,
}

impl ReservationService {
    pub fn new(
        provider: Arc<dyn BookingProvider>,
        invalidator: ReservationInvalidator,
        policy: CachePolicy,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            provider,
            invalidator,
            policy,
            telemetry,
        }
    }

    /// Reserve slots, then invalidate affected cache entries
    ///
    /// Invalidation only runs after the provider accepted the reservation and
    /// cannot fail the call.
    pub async fn make_reservation(
        &self,
        region: Region,
        requests: &[ReservationRequest],
    ) -> BrokerResult<Vec<Reservation>> {
        let reservations = self.provider.reserve_slots(region, requests).await?;

        self.telemetry.event(
            BusinessEvent::SchedulingReservationSuccess,
            "Reservation request succeeded",
            properties([
                ("region", region.to_string()),
                ("reservations", reservations.len().to_string()),
            ]),
        );

        if self.policy.is_globally_enabled() {
            let report = self.invalidator.invalidate(requests).await;
            if report.failed > 0 {
                warn!(
                    region = %region,
                    failed = report.failed,
                    "Some slot cache entries could not be invalidated"
                );
            }
        }

        Ok(reservations)
    }

    pub async fn delete_reservation(&self, region: Region, reservation_id: &str) -> BrokerResult<()> {
        self.provider.delete_reservation(region, reservation_id).await?;
        info!(region = %region, reservation_id, "Reservation deleted");
        Ok(())
    }

    /// Confirm bookings and report any the provider did not confirm
    pub async fn confirm_booking(
        &self,
        region: Region,
        bookings: &[BookingRequest],
    ) -> BrokerResult<Vec<BookingResponse>> {
        let responses = self.provider.confirm_booking(region, bookings).await?;

        let missing = missing_booking_reference_ids(bookings, &responses);
        if missing.is_empty() {
            self.telemetry.event(
                BusinessEvent::SchedulingBookingConfirmationSuccess,
                "Booking confirmation succeeded",
                properties([
                    ("region", region.to_string()),
                    ("bookings", bookings.len().to_string()),
                ]),
            );
        } else {
            warn!(
                region = %region,
                booking_reference_ids = ?missing,
                "TCN did not confirm every booking"
            );
        }

        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{CacheStore, InMemoryCache, SlotCache};
    use crate::core::config::CacheConfig;
    use crate::observability::telemetry::RecordingTelemetry;
    use crate::upstream::testing::FakeProvider;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    const CACHED_KEY: &str = "prefix|availability|TC1|2020-10-25|2020-10-29|CAR";

    fn reservation() -> ReservationRequest {
        ReservationRequest {
            test_centre_id: "TC1".to_string(),
            test_types: vec!["car".to_string()],
            start_date_time: Utc.with_ymd_and_hms(2020, 10, 26, 9, 0, 0).unwrap(),
            quantity: 1,
            lock_time: 300,
        }
    }

    fn booking(reference: &str, reservation: &str) -> BookingRequest {
        BookingRequest {
            booking_reference_id: reference.to_string(),
            reservation_id: reservation.to_string(),
            notes: String::new(),
            behavioural_markers: String::new(),
        }
    }

    fn response(reservation: &str, status: &str) -> BookingResponse {
        BookingResponse {
            reservation_id: reservation.to_string(),
            status: status.to_string(),
            message: String::new(),
        }
    }

    async fn service(
        provider: FakeProvider,
        caching: bool,
    ) -> (ReservationService, Arc<InMemoryCache>, Arc<RecordingTelemetry>) {
        let store = Arc::new(InMemoryCache::new());
        store
            .set(CACHED_KEY, "[]", Duration::from_secs(60))
            .await
            .unwrap();

        let config = CacheConfig {
            enabled: caching,
            key_prefix: "prefix".to_string(),
            ..CacheConfig::default()
        };
        let telemetry = Arc::new(RecordingTelemetry::new());
        let service = ReservationService::new(
            Arc::new(provider),
            ReservationInvalidator::new(SlotCache::new(store.clone()), "prefix"),
            CachePolicy::from_config(&config),
            telemetry.clone(),
        );
        (service, store, telemetry)
    }

    #[tokio::test]
    async fn test_reservation_invalidates_matching_keys() {
        let (service, store, telemetry) = service(FakeProvider::default(), true).await;

        let reservations = service
            .make_reservation(Region::A, &[reservation()])
            .await
            .unwrap();

        assert_eq!(reservations.len(), 1);
        assert_eq!(store.get(CACHED_KEY).await.unwrap(), None);
        assert_eq!(telemetry.count(BusinessEvent::SchedulingReservationSuccess), 1);
    }

    #[tokio::test]
    async fn test_no_invalidation_when_caching_is_off() {
        let (service, store, _) = service(FakeProvider::default(), false).await;

        service
            .make_reservation(Region::A, &[reservation()])
            .await
            .unwrap();

        assert!(store.get(CACHED_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_reservation_leaves_cache_alone() {
        let provider = FakeProvider {
            reservation_failure: Some(409),
            ..Default::default()
        };
        let (service, store, telemetry) = service(provider, true).await;

        let result = service.make_reservation(Region::A, &[reservation()]).await;

        assert!(result.is_err());
        assert!(store.get(CACHED_KEY).await.unwrap().is_some());
        assert_eq!(telemetry.count(BusinessEvent::SchedulingReservationSuccess), 0);
    }

    #[tokio::test]
    async fn test_confirm_booking_reports_success() {
        let (service, _, telemetry) = service(FakeProvider::default(), true).await;

        let responses = service
            .confirm_booking(Region::B, &[booking("B-000-000-001", "reservation-01")])
            .await
            .unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(
            telemetry.count(BusinessEvent::SchedulingBookingConfirmationSuccess),
            1
        );
    }

    #[test]
    fn test_missing_booking_reference_ids() {
        let requests = vec![
            booking("REF-1", "res-1"),
            booking("REF-2", "res-2"),
            booking("REF-3", "res-3"),
        ];
        let responses = vec![response("res-1", "200"), response("res-2", "409")];

        assert_eq!(
            missing_booking_reference_ids(&requests, &responses),
            vec!["REF-2".to_string(), "REF-3".to_string()]
        );
        assert!(missing_booking_reference_ids(&requests[..1], &responses).is_empty());
    }
}
