//! # Behavioural Marker Sync
//!
//! One reconciliation run pushes behavioural marker flags from the CRM into
//! the provider's bookings:
//!
//! 1. Fetch unsynced booking products from the CRM
//! 2. Fetch markers for their candidates in one batch
//! 3. Attach to each product the markers active on its test date
//! 4. For each product in turn, update the booking upstream, then stamp the
//!    product in the CRM
//!
//! A product that fails is skipped and retried by the next run, since its
//! stamp never moved. An authentication failure (401/403) aborts the run.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::core::error::{BrokerError, BrokerResult};
use crate::core::types::{BehaviouralMarker, BookingProduct, PutBookingRequest};
use crate::crm::CrmGateway;
use crate::upstream::BookingProvider;

/// Text written to the booking when the candidate has an active marker
pub const MARKER_SENTENCE: &str = "Candidate has a behavioural marker";

/// A booking product with the markers active on its test date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductWithMarkers {
    pub product: BookingProduct,
    pub markers: Vec<BehaviouralMarker>,
}

impl ProductWithMarkers {
    /// Payload for the provider's booking update
    pub fn update_request(&self) -> PutBookingRequest {
        PutBookingRequest {
            notes: String::new(),
            behavioural_markers: if self.markers.is_empty() {
                String::new()
            } else {
                MARKER_SENTENCE.to_string()
            },
        }
    }
}

/// Result of syncing one product
#[derive(Debug)]
pub enum ItemOutcome {
    Synced,
    /// Failed, the run continues
    Skipped(BrokerError),
    /// Failed on authentication, the run stops
    Fatal(BrokerError),
}

/// Summary of a completed run
#[derive(Debug, Default)]
pub struct SyncReport {
    pub total: usize,
    /// Booking references pushed and stamped
    pub synced: Vec<String>,
    /// Booking references that failed, with the error
    pub skipped: Vec<(String, BrokerError)>,
}

/// Drives one marker reconciliation run
pub struct SyncController {
    crm: Arc<dyn CrmGateway>,
    provider: Arc<dyn BookingProvider>,
}

impl SyncController {
    pub fn new(crm: Arc<dyn CrmGateway>, provider: Arc<dyn BookingProvider>) -> Self {
        Self { crm, provider }
    }

    /// Unsynced products, each with its active markers attached
    pub async fn booking_products_with_markers(&self) -> BrokerResult<Vec<ProductWithMarkers>> {
        let products = self.crm.get_unsynced_booking_products().await?;
        if products.is_empty() {
            debug!("Found zero booking products to update");
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let candidate_ids: Vec<String> = products
            .iter()
            .filter_map(|p| p.candidate_id.clone())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let markers = if candidate_ids.is_empty() {
            Vec::new()
        } else {
            self.crm.get_behavioural_markers_batch(&candidate_ids).await?
        };

        Ok(products
            .into_iter()
            .map(|product| {
                let active = active_markers(&product, &markers);
                ProductWithMarkers {
                    product,
                    markers: active,
                }
            })
            .collect())
    }

    /// Push one product and stamp it
    pub async fn sync_item(&self, item: &ProductWithMarkers) -> ItemOutcome {
        let product = &item.product;

        match self.push_and_stamp(item).await {
            Ok(()) => {
                info!(
                    reference = %product.reference,
                    booking_product_id = %product.id,
                    candidate_id = ?product.candidate_id,
                    "Successfully updated TCN booking"
                );
                ItemOutcome::Synced
            }
            Err(e) => {
                error!(
                    reference = %product.reference,
                    booking_product_id = %product.id,
                    error = %e,
                    "Error processing booking reference"
                );
                if e.is_auth_failure() {
                    ItemOutcome::Fatal(e)
                } else {
                    ItemOutcome::Skipped(e)
                }
            }
        }
    }

    async fn push_and_stamp(&self, item: &ProductWithMarkers) -> BrokerResult<()> {
        let product = &item.product;
        self.provider
            .put_booking(product.region, &product.reference, &item.update_request())
            .await?;
        self.crm.update_tcn_update_date(&product.id).await
    }

    /// Run a full reconciliation, one product at a time
    ///
    /// Returns the first authentication failure as an error. Products after
    /// it are left for the next run.
    pub async fn run(&self) -> BrokerResult<SyncReport> {
        let items = self.booking_products_with_markers().await?;
        let mut report = SyncReport {
            total: items.len(),
            ..Default::default()
        };

        for item in &items {
            match self.sync_item(item).await {
                ItemOutcome::Synced => report.synced.push(item.product.reference.clone()),
                ItemOutcome::Skipped(e) => report.skipped.push((item.product.reference.clone(), e)),
                ItemOutcome::Fatal(e) => {
                    error!(
                        reference = %item.product.reference,
                        remaining = items.len() - report.synced.len() - report.skipped.len() - 1,
                        "Authentication failure, aborting behavioural marker sync"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            total = report.total,
            synced = report.synced.len(),
            skipped = report.skipped.len(),
            "Behavioural marker sync finished"
        );
        Ok(report)
    }
}

/// Markers of the product's candidate whose window strictly contains its
/// test date
fn active_markers(product: &BookingProduct, markers: &[BehaviouralMarker]) -> Vec<BehaviouralMarker> {
    let (Some(candidate_id), Some(test_date)) = (&product.candidate_id, product.test_date) else {
        return Vec::new();
    };

    markers
        .iter()
        .filter(|m| &m.candidate_id == candidate_id && m.is_active_at(test_date))
        .cloned()
        .collect()
}
