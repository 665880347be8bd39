//! # Gateway Module
//!
//! HTTP surface of the broker: request validation and the axum router.

pub mod server;
pub mod validators;

pub use server::{build_router, AppState, BrokerServer};
