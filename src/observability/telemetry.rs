//! # Business Telemetry
//!
//! Named business events raised by the slot pipeline, the provider client and
//! the marker sync. Emission is synchronous and fire-and-forget: it never
//! fails and never waits on delivery.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use tracing::info;

/// Named business events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusinessEvent {
    SchedulingSlotInvalid,
    SchedulingAuthError,
    SchedulingConnectionError,
    SchedulingError,
    SchedulingReservationSuccess,
    SchedulingBookingConfirmationSuccess,
    BmsError,
    BmsCdsAuthError,
    BmsCdsFail,
    BmsCdsConnectionError,
    BmsCdsError,
}

impl BusinessEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchedulingSlotInvalid => "SCHEDULING_SLOT_INVALID",
            Self::SchedulingAuthError => "SCHEDULING_AUTH_ERROR",
            Self::SchedulingConnectionError => "SCHEDULING_CONNECTION_ERROR",
            Self::SchedulingError => "SCHEDULING_ERROR",
            Self::SchedulingReservationSuccess => "SCHEDULING_RESERVATION_SUCCESS",
            Self::SchedulingBookingConfirmationSuccess => "SCHEDULING_BOOKING_CONFIRMATION_SUCCESS",
            Self::BmsError => "BMS_ERROR",
            Self::BmsCdsAuthError => "BMS_CDS_AUTH_ERROR",
            Self::BmsCdsFail => "BMS_CDS_FAIL",
            Self::BmsCdsConnectionError => "BMS_CDS_CONNECTION_ERROR",
            Self::BmsCdsError => "BMS_CDS_ERROR",
        }
    }
}

impl fmt::Display for BusinessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra context attached to an event
pub type EventProperties = BTreeMap<String, String>;

/// Sink for business events
pub trait Telemetry: Send + Sync {
    fn event(&self, event: BusinessEvent, message: &str, properties: EventProperties);
}

/// Shorthand for building event properties
pub fn properties<const N: usize>(pairs: [(&str, String); N]) -> EventProperties {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Event for a failed provider call, keyed on the HTTP status
pub fn tcn_status_event(status: Option<u16>) -> Option<BusinessEvent> {
    match status? {
        401 | 403 => Some(BusinessEvent::SchedulingAuthError),
        502 | 503 | 504 => Some(BusinessEvent::SchedulingConnectionError),
        500 => Some(BusinessEvent::SchedulingError),
        _ => None,
    }
}

/// Event for a failed CRM call, keyed on the HTTP status
///
/// A call that never got a status is a connection problem.
pub fn crm_status_event(status: Option<u16>) -> BusinessEvent {
    match status {
        Some(401) | Some(403) => BusinessEvent::BmsCdsAuthError,
        Some(502) | Some(503) | Some(504) | None => BusinessEvent::BmsCdsConnectionError,
        Some(status) if (400..500).contains(&status) => BusinessEvent::BmsCdsFail,
        Some(_) => BusinessEvent::BmsCdsError,
    }
}

/// Emits events as `tracing` records and `metrics` counters
#[derive(Debug, Clone, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn event(&self, event: BusinessEvent, message: &str, properties: EventProperties) {
        metrics::counter!("broker_business_events_total", "event" => event.as_str()).increment(1);
        info!(
            target: "business_event",
            event = %event,
            properties = ?properties,
            "{}",
            message
        );
    }
}

/// A captured event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: BusinessEvent,
    pub message: String,
    pub properties: EventProperties,
}

/// Keeps every event in memory, for assertions
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event: BusinessEvent) -> usize {
        self.events().iter().filter(|e| e.event == event).count()
    }
}

impl Telemetry for RecordingTelemetry {
    fn event(&self, event: BusinessEvent, message: &str, properties: EventProperties) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                event,
                message: message.to_string(),
                properties,
            });
        }
    }
}
