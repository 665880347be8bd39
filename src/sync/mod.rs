//! # Sync Module
//!
//! Behavioural marker reconciliation between the CRM and the provider.

pub mod controller;

pub use controller::{ItemOutcome, ProductWithMarkers, SyncController, SyncReport, MARKER_SENTENCE};
