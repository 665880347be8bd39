//! # Request Validation
//!
//! Field checks for slot, reservation and booking requests. Every failure is
//! a [`BrokerError::RequestValidation`] naming the offending field, which the
//! HTTP layer renders as a 400.

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::core::error::{BrokerError, BrokerResult};
use crate::core::types::{is_known_test_type, BookingRequest, Region, ReservationRequest, SlotQuery};

pub const MAX_TEST_CENTRE_ID_LENGTH: usize = 72;
pub const MIN_REFERENCE_LENGTH: usize = 10;
pub const MAX_REFERENCE_LENGTH: usize = 72;
pub const MAX_NOTES_LENGTH: usize = 4096;
pub const MAX_QUANTITY: u32 = 512;
/// Six months, in seconds
pub const MAX_LOCK_TIME: u32 = 15_768_000;
pub const MAX_MONTHS_AHEAD: u32 = 6;
/// Week-split queries must span fewer than this many weeks
pub const MAX_SPLIT_WEEKS: i64 = 5;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn invalid(field: &str, reason: &str) -> BrokerError {
    warn!(field, reason, "Request validation failed");
    BrokerError::validation(field, reason)
}

/// Slot query string as received
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSlotQuery {
    /// JSON array, e.g. `["CAR","TAXI"]`
    pub test_types: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub preferred_date: Option<String>,
}

pub fn validate_region_id(raw: &str) -> BrokerResult<Region> {
    raw.parse::<Region>().map_err(|_| invalid("regionId", "Invalid region id"))
}

pub fn validate_test_centre_id(test_centre_id: &str) -> BrokerResult<()> {
    if test_centre_id.trim().is_empty() || test_centre_id.chars().count() > MAX_TEST_CENTRE_ID_LENGTH {
        return Err(invalid("testCentreId", "Test centre ID wrong length"));
    }
    Ok(())
}

pub fn validate_test_types(test_types: &[String]) -> BrokerResult<()> {
    if test_types.is_empty() {
        return Err(invalid("testTypes", "At least one test type is required"));
    }
    if let Some(unknown) = test_types.iter().find(|t| !is_known_test_type(t)) {
        return Err(invalid("testTypes", &format!("Test type {} not found", unknown)));
    }
    Ok(())
}

/// Parse the `testTypes` query parameter, a JSON array of strings
pub fn parse_test_types(raw: &str) -> BrokerResult<Vec<String>> {
    let test_types: Vec<String> = serde_json::from_str(raw)
        .map_err(|_| invalid("testTypes", "Unable to parse test types"))?;
    validate_test_types(&test_types)?;
    Ok(test_types)
}

/// Parse a strict `YYYY-MM-DD` date
pub fn parse_date(field: &str, raw: &str) -> BrokerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .filter(|date| date.format(DATE_FORMAT).to_string() == raw)
        .ok_or_else(|| invalid(field, "Date is invalid"))
}

fn required<'a>(field: &str, value: &'a Option<String>) -> BrokerResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid(field, "Missing required parameter"))
}

/// Validate a single-range slot query against `today`
pub fn validate_slot_query(
    test_centre_id: &str,
    raw: &RawSlotQuery,
    today: NaiveDate,
) -> BrokerResult<SlotQuery> {
    validate_test_centre_id(test_centre_id)?;
    let test_types = parse_test_types(required("testTypes", &raw.test_types)?)?;
    let date_from = parse_date("dateFrom", required("dateFrom", &raw.date_from)?)?;
    let date_to = parse_date("dateTo", required("dateTo", &raw.date_to)?)?;

    if date_from > date_to {
        return Err(invalid("dateTo", "To date is before from date"));
    }
    if date_from < today {
        return Err(invalid("dateFrom", "From date is in the past"));
    }
    let horizon = today
        .checked_add_months(Months::new(MAX_MONTHS_AHEAD))
        .unwrap_or(NaiveDate::MAX);
    if date_from > horizon {
        return Err(invalid("dateFrom", "From date is more than 6 months in the future"));
    }

    let mut query = SlotQuery::new(test_centre_id, test_types, date_from, date_to);
    if let Some(preferred) = raw.preferred_date.as_deref().filter(|v| !v.is_empty()) {
        query = query.with_preferred_date(parse_date("preferredDate", preferred)?);
    }
    Ok(query)
}

/// Validate a slot query that will be split into weeks
pub fn validate_week_split_query(
    test_centre_id: &str,
    raw: &RawSlotQuery,
    today: NaiveDate,
) -> BrokerResult<SlotQuery> {
    let query = validate_slot_query(test_centre_id, raw, today)?;
    if (query.date_to - query.date_from).num_days() >= MAX_SPLIT_WEEKS * 7 {
        return Err(invalid("dateTo", "Date range is more than 5 weeks"));
    }
    Ok(query)
}

pub fn validate_reservation_request(
    request: &ReservationRequest,
    now: DateTime<Utc>,
) -> BrokerResult<()> {
    validate_test_types(&request.test_types)?;
    validate_test_centre_id(&request.test_centre_id)?;
    if request.start_date_time < now {
        return Err(invalid("startDateTime", "Start date time is in the past"));
    }
    if !(1..=MAX_QUANTITY).contains(&request.quantity) {
        return Err(invalid("quantity", "Quantity must be between 1 and 512"));
    }
    if !(1..=MAX_LOCK_TIME).contains(&request.lock_time) {
        return Err(invalid("lockTime", "Lock time must be between 1 and 15768000"));
    }
    Ok(())
}

fn validate_reference(field: &str, value: &str, reason: &str) -> BrokerResult<()> {
    let length = value.chars().count();
    if !(MIN_REFERENCE_LENGTH..=MAX_REFERENCE_LENGTH).contains(&length) {
        return Err(invalid(field, reason));
    }
    Ok(())
}

pub fn validate_reservation_id(reservation_id: &str) -> BrokerResult<()> {
    validate_reference("reservationId", reservation_id, "Invalid reservation id")
}

pub fn validate_booking_reference_id(booking_reference_id: &str) -> BrokerResult<()> {
    validate_reference(
        "bookingReferenceId",
        booking_reference_id,
        "Invalid booking reference id",
    )
}

pub fn validate_notes_and_behavioural_markers(notes: &str, behavioural_markers: &str) -> BrokerResult<()> {
    if notes.chars().count() > MAX_NOTES_LENGTH {
        return Err(invalid("notes", "Invalid notes/behavioural markers value"));
    }
    if behavioural_markers.chars().count() > MAX_NOTES_LENGTH {
        return Err(invalid("behaviouralMarkers", "Invalid notes/behavioural markers value"));
    }
    Ok(())
}

pub fn validate_booking_request(booking: &BookingRequest) -> BrokerResult<()> {
    validate_notes_and_behavioural_markers(&booking.notes, &booking.behavioural_markers)?;
    validate_booking_reference_id(&booking.booking_reference_id)?;
    validate_reservation_id(&booking.reservation_id)
}

/// Decode a request body that must be a non-empty JSON array
pub fn parse_json_array<T: DeserializeOwned>(body: &[u8]) -> BrokerResult<Vec<T>> {
    let items: Vec<T> = serde_json::from_slice(body)
        .map_err(|e| invalid("body", &format!("Payload not a valid array: {}", e)))?;
    if items.is_empty() {
        return Err(invalid("body", "Payload not an array"));
    }
    Ok(items)
}

/// Decode a request body as a single JSON object
pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> BrokerResult<T> {
    serde_json::from_slice(body).map_err(|e| invalid("body", &format!("Invalid request body: {}", e)))
}
