//! # Booking Provider Client
//!
//! Per-region client for the test-centre-network (TCN) booking API. Every
//! successful body is wrapped as `{ "data": ... }`. Each operation has a fixed
//! set of "known" failure statuses that surface as [`BrokerError::Tcn`];
//! anything else surfaces as [`BrokerError::Upstream`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use url::Url;

use super::auth::StaticTokenProvider;
use super::client::AuthenticatedHttpClient;
use crate::core::config::TcnConfig;
use crate::core::error::{BrokerError, BrokerResult, UpstreamFailure};
use crate::core::types::{
    BookingFullResponse, BookingRequest, BookingResponse, PutBookingRequest, Region,
    Reservation, ReservationRequest, Slot, SlotQuery, TcnResponse,
};
use crate::observability::telemetry::{properties, tcn_status_event, BusinessEvent, Telemetry};

pub const KNOWN_SLOTS_ERROR_CODES: &[u16] = &[401, 403, 404, 429, 500, 503];
pub const KNOWN_BOOKINGS_ERROR_CODES: &[u16] = &[400, 401, 403, 404, 429, 500, 503];
pub const KNOWN_RESERVATIONS_ERROR_CODES: &[u16] = &[400, 401, 403, 409, 429, 500, 503];
pub const KNOWN_RESERVATIONS_DELETE_ERROR_CODES: &[u16] = &[400, 401, 403, 404, 429, 500, 503];

const SERVICE_NAME: &str = "tcn";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Decode slot list entries one at a time
///
/// An entry that is not a slot (null, or a slot with a missing or null
/// field) is dropped and reported as `SchedulingSlotInvalid`, so one bad
/// entry never fails the whole list.
pub fn decode_slots(entries: Vec<serde_json::Value>, telemetry: &dyn Telemetry) -> Vec<Slot> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Slot>(entry.clone()) {
            Ok(slot) => Some(slot),
            Err(e) => {
                let field = |name: &str| {
                    entry
                        .get(name)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                warn!(error = %e, "Dropping malformed TCN slot");
                telemetry.event(
                    BusinessEvent::SchedulingSlotInvalid,
                    "Slot could not be decoded",
                    properties([
                        ("testCentreId", field("testCentreId")),
                        ("startDateTime", field("startDateTime")),
                    ]),
                );
                None
            }
        })
        .collect()
}

/// Operations offered by the booking provider
#[async_trait]
pub trait BookingProvider: Send + Sync {
    async fn retrieve_slots(&self, region: Region, query: &SlotQuery) -> BrokerResult<Vec<Slot>>;

    async fn reserve_slots(
        &self,
        region: Region,
        requests: &[ReservationRequest],
    ) -> BrokerResult<Vec<Reservation>>;

    async fn delete_reservation(&self, region: Region, reservation_id: &str) -> BrokerResult<()>;

    async fn confirm_booking(
        &self,
        region: Region,
        bookings: &[BookingRequest],
    ) -> BrokerResult<Vec<BookingResponse>>;

    async fn get_booking(
        &self,
        region: Region,
        booking_reference_id: &str,
    ) -> BrokerResult<BookingFullResponse>;

    async fn put_booking(
        &self,
        region: Region,
        booking_reference_id: &str,
        update: &PutBookingRequest,
    ) -> BrokerResult<BookingFullResponse>;

    async fn delete_booking(&self, region: Region, booking_reference_id: &str) -> BrokerResult<()>;
}

/// [`BookingProvider`] over HTTP
pub struct HttpBookingProvider {
    client: AuthenticatedHttpClient,
    config: TcnConfig,
    telemetry: Arc<dyn Telemetry>,
}

impl HttpBookingProvider {
    pub fn new(
        client: AuthenticatedHttpClient,
        config: TcnConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            client,
            config,
            telemetry,
        }
    }

    /// Provider with its own HTTP client and the configured static token
    pub fn from_config(config: &TcnConfig, telemetry: Arc<dyn Telemetry>) -> BrokerResult<Self> {
        let tokens = Arc::new(StaticTokenProvider::new(config.bearer_token.clone()));
        let client = AuthenticatedHttpClient::new(config.request_timeout, tokens)?;
        Ok(Self::new(client, config.clone(), telemetry))
    }

    /// Region base URL with path segments appended, each one percent-encoded
    fn endpoint(&self, region: Region, segments: &[&str]) -> BrokerResult<Url> {
        let base = self.config.base_url(region);
        let mut url = Url::parse(base).map_err(|e| {
            BrokerError::config(format!("Invalid TCN base URL for region {}: {}", region, e))
        })?;

        url.path_segments_mut()
            .map_err(|_| {
                BrokerError::config(format!("TCN base URL for region {} cannot be a base", region))
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    /// Log, emit telemetry and turn a failure into the operation's error
    fn translate(
        &self,
        operation: &'static str,
        region: Region,
        failure: UpstreamFailure,
        known_codes: &[u16],
    ) -> BrokerError {
        let status = failure.status();

        if let Some(event) = tcn_status_event(status) {
            self.telemetry.event(
                event,
                &format!("{}: TCN request failed", operation),
                properties([
                    ("operation", operation.to_string()),
                    ("region", region.to_string()),
                    ("status", status.map(|s| s.to_string()).unwrap_or_default()),
                ]),
            );
        }

        match status {
            Some(401) | Some(403) | Some(500) | Some(503) | Some(400) => {
                error!(operation, region = %region, status = ?status, error = %failure, "TCN request failed")
            }
            _ => {
                warn!(operation, region = %region, status = ?status, error = %failure, "TCN request failed")
            }
        }

        match failure {
            UpstreamFailure::Http {
                status,
                message,
                retry_after,
            } if known_codes.contains(&status) => BrokerError::Tcn {
                status,
                message,
                retry_after,
            },
            other => BrokerError::upstream(SERVICE_NAME, other),
        }
    }
}

#[async_trait]
impl BookingProvider for HttpBookingProvider {
    async fn retrieve_slots(&self, region: Region, query: &SlotQuery) -> BrokerResult<Vec<Slot>> {
        let url = self.endpoint(region, &["testCentres", query.test_centre_id.as_str(), "slots"])?;

        let mut params = vec![
            ("testTypes", serde_json::to_string(&query.test_types)?),
            ("dateFrom", query.date_from.format(DATE_FORMAT).to_string()),
            ("dateTo", query.date_to.format(DATE_FORMAT).to_string()),
        ];
        if let Some(preferred) = query.preferred_date {
            if self.config.accepts_preferred_date(region) {
                params.push(("preferredDate", preferred.format(DATE_FORMAT).to_string()));
            }
        }

        info!("Sending TCN slots request to {}", url);
        let response: TcnResponse<Vec<serde_json::Value>> = self
            .client
            .send_json(self.client.get(url.as_str()).query(&params))
            .await
            .map_err(|e| self.translate("retrieve_slots", region, e, KNOWN_SLOTS_ERROR_CODES))?;

        debug!("TCN returned {} slots", response.data.len());
        Ok(decode_slots(response.data, self.telemetry.as_ref()))
    }

    async fn reserve_slots(
        &self,
        region: Region,
        requests: &[ReservationRequest],
    ) -> BrokerResult<Vec<Reservation>> {
        let url = self.endpoint(region, &["reservations"])?;

        info!(count = requests.len(), "Sending TCN reservations request");
        let response: TcnResponse<Vec<Reservation>> = self
            .client
            .send_json(self.client.post(url.as_str()).json(requests))
            .await
            .map_err(|e| {
                self.translate("reserve_slots", region, e, KNOWN_RESERVATIONS_ERROR_CODES)
            })?;

        Ok(response.data)
    }

    async fn delete_reservation(&self, region: Region, reservation_id: &str) -> BrokerResult<()> {
        let url = self.endpoint(region, &["reservations", reservation_id])?;

        info!("Sending TCN delete reservation request to {}", url);
        self.client
            .send(self.client.delete(url.as_str()))
            .await
            .map_err(|e| {
                self.translate(
                    "delete_reservation",
                    region,
                    e,
                    KNOWN_RESERVATIONS_DELETE_ERROR_CODES,
                )
            })?;

        Ok(())
    }

    async fn confirm_booking(
        &self,
        region: Region,
        bookings: &[BookingRequest],
    ) -> BrokerResult<Vec<BookingResponse>> {
        let url = self.endpoint(region, &["bookings"])?;

        info!(count = bookings.len(), "Sending TCN confirm booking request");
        let response: TcnResponse<Vec<BookingResponse>> = self
            .client
            .send_json(self.client.post(url.as_str()).json(bookings))
            .await
            .map_err(|e| self.translate("confirm_booking", region, e, KNOWN_BOOKINGS_ERROR_CODES))?;

        Ok(response.data)
    }

    async fn get_booking(
        &self,
        region: Region,
        booking_reference_id: &str,
    ) -> BrokerResult<BookingFullResponse> {
        let url = self.endpoint(region, &["bookings", booking_reference_id])?;

        info!("Sending TCN get booking request to {}", url);
        let response: TcnResponse<BookingFullResponse> = self
            .client
            .send_json(self.client.get(url.as_str()))
            .await
            .map_err(|e| self.translate("get_booking", region, e, KNOWN_BOOKINGS_ERROR_CODES))?;

        Ok(response.data)
    }

    async fn put_booking(
        &self,
        region: Region,
        booking_reference_id: &str,
        update: &PutBookingRequest,
    ) -> BrokerResult<BookingFullResponse> {
        let url = self.endpoint(region, &["bookings", booking_reference_id])?;

        info!("Sending TCN put booking request to {}", url);
        let response: TcnResponse<BookingFullResponse> = self
            .client
            .send_json(self.client.put(url.as_str()).json(update))
            .await
            .map_err(|e| self.translate("put_booking", region, e, KNOWN_BOOKINGS_ERROR_CODES))?;

        Ok(response.data)
    }

    async fn delete_booking(&self, region: Region, booking_reference_id: &str) -> BrokerResult<()> {
        let url = self.endpoint(region, &["bookings", booking_reference_id])?;

        info!("Sending TCN delete booking request to {}", url);
        self.client
            .send(self.client.delete(url.as_str()))
            .await
            .map_err(|e| self.translate("delete_booking", region, e, KNOWN_BOOKINGS_ERROR_CODES))?;

        Ok(())
    }
}
