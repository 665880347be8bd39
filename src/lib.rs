//! # Slot Broker Library
//!
//! A regional broker in front of the test-centre scheduling provider (TCN).
//! It serves booking-slot availability through a Redis-backed cache, forwards
//! reservations and bookings, evicts cached availability a reservation may
//! have made stale, and reconciles behavioural markers held in the CRM with
//! the provider's bookings.
//!
//! ## Layout
//! - `core`: error types, configuration and the domain data structures
//! - `caching`: cache keys, stores, the slot cache and reservation invalidation
//! - `upstream`: the authenticated HTTP client and the TCN provider client
//! - `slots`: the slot pipeline, week splitting and reservation handling
//! - `crm`: the Dynamics CRM client for booking products and markers
//! - `sync`: the behavioural marker reconciliation job
//! - `gateway`: request validation and the HTTP surface
//! - `observability`: structured logging and business telemetry

/// Error types, configuration and domain data structures
pub mod core;

/// Slot cache: key codec, storage backends and reservation-driven invalidation
pub mod caching;

/// Clients for the scheduling provider
pub mod upstream;

/// Slot retrieval pipeline and reservation handling
pub mod slots;

/// CRM access for behavioural marker sync
pub mod crm;

/// Behavioural marker reconciliation
pub mod sync;

/// HTTP surface: validators, router and server
pub mod gateway;

/// Logging and business events
pub mod observability;

/// Main error type used throughout the broker
pub use core::error::{BrokerError, BrokerResult};

/// Main configuration structure
pub use core::config::BrokerConfig;

/// Server entry points
pub use gateway::{build_router, AppState, BrokerServer};

/// Marker sync entry point
pub use sync::SyncController;
