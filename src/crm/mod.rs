//! # CRM Module
//!
//! The CRM side of the behavioural marker sync: which booking products need
//! pushing, which markers their candidates carry, and stamping a product once
//! it has been pushed.

pub mod dynamics;

pub use dynamics::DynamicsCrmClient;

use async_trait::async_trait;

use crate::core::error::BrokerResult;
use crate::core::types::{BehaviouralMarker, BookingProduct};

/// Operations the marker sync needs from the CRM
#[async_trait]
pub trait CrmGateway: Send + Sync {
    /// Products whose slot data changed after the last push, not cancelled,
    /// with a test date today or later
    async fn get_unsynced_booking_products(&self) -> BrokerResult<Vec<BookingProduct>>;

    /// Every marker raised against any of the candidates
    async fn get_behavioural_markers_batch(
        &self,
        candidate_ids: &[String],
    ) -> BrokerResult<Vec<BehaviouralMarker>>;

    /// Record that a product was pushed to the provider just now
    async fn update_tcn_update_date(&self, booking_product_id: &str) -> BrokerResult<()>;
}
