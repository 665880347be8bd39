//! # Slots Module
//!
//! Slot availability lookups and the reservation and booking writes that
//! change availability.

pub mod pipeline;
pub mod reservations;
pub mod splitter;

pub use pipeline::{remove_invalid_slots, SlotService};
pub use reservations::ReservationService;
pub use splitter::split_into_week_long_requests;
