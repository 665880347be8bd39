//! # Upstream Module
//!
//! Outbound HTTP: token sources, the authenticated client and the booking
//! provider built on it.

pub mod auth;
pub mod client;
pub mod tcn;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use client::AuthenticatedHttpClient;
pub use tcn::{BookingProvider, HttpBookingProvider};
