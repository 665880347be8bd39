//! # Core Types Module
//!
//! Domain data structures shared by the slot pipeline, the reservation flow
//! and the behavioural marker sync. Wire names follow the provider's
//! camelCase JSON so these types can be sent and received as-is.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::error::BrokerError;

/// Test types the provider accepts. Comparisons are case-insensitive.
pub const KNOWN_TEST_TYPES: &[&str] = &[
    "CAR",
    "MOTORCYCLE",
    "LGV_MC",
    "LGV_HPT",
    "LGV_CPC",
    "LGV_CPC_C",
    "PCV_MC",
    "PCV_HPT",
    "PCV_CPC",
    "PCV_CPC_C",
    "ADI_P1",
    "ADI_HPT",
    "ERS",
    "AMI_P1",
    "TAXI",
];

/// Check a test type against the allow-list, ignoring case
pub fn is_known_test_type(test_type: &str) -> bool {
    let upper = test_type.to_uppercase();
    KNOWN_TEST_TYPES.iter().any(|known| *known == upper)
}

/// Upper-case a list of test types, preserving order
pub fn normalize_test_types(test_types: &[String]) -> Vec<String> {
    test_types.iter().map(|t| t.to_uppercase()).collect()
}

/// Geographic partition of the booking provider
///
/// Each region has its own upstream base URL and its own cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    A,
    B,
    C,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::A, Region::B, Region::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::A => "a",
            Region::B => "b",
            Region::C => "c",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" => Ok(Region::A),
            "b" => Ok(Region::B),
            "c" => Ok(Region::C),
            _ => Err(BrokerError::RequestValidation {
                field: "regionId".to_string(),
                reason: "Invalid region id".to_string(),
            }),
        }
    }
}

/// A slot availability query for one test centre
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub test_centre_id: String,
    pub test_types: Vec<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub preferred_date: Option<NaiveDate>,
}

impl SlotQuery {
    pub fn new(
        test_centre_id: impl Into<String>,
        test_types: Vec<String>,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Self {
        Self {
            test_centre_id: test_centre_id.into(),
            test_types,
            date_from,
            date_to,
            preferred_date: None,
        }
    }

    pub fn with_preferred_date(mut self, preferred_date: NaiveDate) -> Self {
        self.preferred_date = Some(preferred_date);
        self
    }

    /// Same query over a different date range
    pub fn with_range(&self, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        Self {
            date_from,
            date_to,
            ..self.clone()
        }
    }
}

/// A bookable slot as returned by the provider
///
/// `start_date_time` is kept as the raw upstream string so a non-canonical
/// instant can be detected and dropped. Entries that do not decode at all
/// are dropped earlier, one by one, by the provider client. The three `date_available_*` fields are KPI markers: they are
/// returned to the caller but never written to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub test_centre_id: String,
    pub test_types: Vec<String>,
    pub start_date_time: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_available_on_or_before_preferred_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_available_on_or_after_preferred_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_available_on_or_after_today: Option<String>,
}

impl Slot {
    /// Copy of the slot with the KPI fields removed
    pub fn without_kpi(&self) -> Self {
        Self {
            date_available_on_or_before_preferred_date: None,
            date_available_on_or_after_preferred_date: None,
            date_available_on_or_after_today: None,
            ..self.clone()
        }
    }

    pub fn has_kpi(&self) -> bool {
        self.date_available_on_or_before_preferred_date.is_some()
            || self.date_available_on_or_after_preferred_date.is_some()
            || self.date_available_on_or_after_today.is_some()
    }
}

/// Strip KPI fields from every slot
pub fn remove_kpi_data(slots: &[Slot]) -> Vec<Slot> {
    slots.iter().map(Slot::without_kpi).collect()
}

/// A request to hold one or more places on a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub test_centre_id: String,
    pub test_types: Vec<String>,
    pub start_date_time: DateTime<Utc>,
    pub quantity: u32,
    /// Lock time in seconds
    pub lock_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub test_centre_id: String,
    pub test_types: Vec<String>,
    pub start_date_time: String,
    pub reservation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub booking_reference_id: String,
    pub reservation_id: String,
    pub notes: String,
    pub behavioural_markers: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub reservation_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingFullResponse {
    pub booking_reference_id: String,
    pub reservation_id: String,
    pub test_centre_id: String,
    pub start_date_time: String,
    pub test_types: Vec<String>,
    pub notes: String,
    pub behavioural_markers: String,
}

/// Notes and behavioural marker fields of a booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutBookingRequest {
    pub notes: String,
    pub behavioural_markers: String,
}

/// Provider envelope: every successful response body is `{ "data": ... }`
#[derive(Debug, Clone, Deserialize)]
pub struct TcnResponse<T> {
    pub data: T,
}

/// A CRM booking product that may need its markers pushed to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingProduct {
    pub id: String,
    pub booking_id: String,
    /// Absent means the product is not eligible for marker sync
    pub candidate_id: Option<String>,
    pub reference: String,
    pub test_date: Option<DateTime<Utc>>,
    pub tcn_slot_data_updated_on: Option<DateTime<Utc>>,
    pub tcn_update_date: Option<DateTime<Utc>>,
    pub region: Region,
}

/// A time-windowed flag raised against a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviouralMarker {
    pub id: String,
    pub candidate_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub case_id: Option<String>,
    pub description: Option<String>,
    pub removal_reason: Option<i64>,
    pub removal_reason_details: Option<String>,
    pub update_reason: Option<i64>,
    pub update_reason_details: Option<String>,
    pub blocked_from_booking_online: Option<bool>,
}

impl BehaviouralMarker {
    /// True when `instant` lies strictly inside the marker's validity window
    pub fn is_active_at(&self, instant: DateTime<Utc>) -> bool {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => instant > start && instant < end,
            _ => false,
        }
    }
}
