//! # HTTP Server Module
//!
//! The broker's HTTP surface. Handlers are thin: validate the request, call
//! the slot, reservation or booking operation, and let [`BrokerError`] render
//! any failure as `{ code, message }`.
//!
//! ## Routes
//! - `GET    /health`
//! - `GET    /api/v1/:region/testCentres/:test_centre_id/slots`
//! - `GET    /api/v1/:region/testCentres/:test_centre_id/slots-tb` (fetched week by week)
//! - `POST   /api/v1/:region/reservations`
//! - `DELETE /api/v1/:region/reservations/:reservation_id`
//! - `POST   /api/v1/:region/bookings`
//! - `GET | PUT | DELETE /api/v1/:region/bookings/:booking_reference_id`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    error_handling::HandleErrorLayer,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    BoxError, Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use super::validators::{
    parse_json_array, parse_json_body, validate_booking_reference_id, validate_booking_request,
    validate_notes_and_behavioural_markers, validate_region_id, validate_reservation_id,
    validate_reservation_request, validate_slot_query, validate_week_split_query, RawSlotQuery,
};
use crate::caching::{connect_store, ReservationInvalidator, SlotCache};
use crate::core::config::{BrokerConfig, ServerConfig};
use crate::core::error::{BrokerError, BrokerResult};
use crate::core::types::{
    BookingFullResponse, BookingRequest, BookingResponse, PutBookingRequest, Reservation,
    ReservationRequest, Slot,
};
use crate::observability::Telemetry;
use crate::slots::{ReservationService, SlotService};
use crate::upstream::{BookingProvider, HttpBookingProvider};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub slots: SlotService,
    pub reservations: ReservationService,
    pub provider: Arc<dyn BookingProvider>,
    pub cache: SlotCache,
}

impl AppState {
    /// Wire services around an existing provider and cache
    pub fn new(
        config: &BrokerConfig,
        provider: Arc<dyn BookingProvider>,
        cache: SlotCache,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let policy = config.cache_policy();
        let invalidator = ReservationInvalidator::new(cache.clone(), policy.key_prefix());

        Self {
            slots: SlotService::new(
                provider.clone(),
                cache.clone(),
                policy.clone(),
                telemetry.clone(),
            ),
            reservations: ReservationService::new(provider.clone(), invalidator, policy, telemetry),
            provider,
            cache,
        }
    }

    /// Connect the cache store and build the HTTP provider client
    pub async fn from_config(config: &BrokerConfig, telemetry: Arc<dyn Telemetry>) -> BrokerResult<Self> {
        let store = connect_store(&config.cache)
            .await
            .map_err(|e| BrokerError::internal(format!("Failed to connect slot cache: {}", e)))?;
        let provider = Arc::new(HttpBookingProvider::from_config(&config.tcn, telemetry.clone())?);

        Ok(Self::new(config, provider, SlotCache::new(store), telemetry))
    }
}

/// Build the broker router
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/:region/testCentres/:test_centre_id/slots", get(get_slots))
        .route("/:region/testCentres/:test_centre_id/slots-tb", get(get_slots_by_week))
        .route("/:region/reservations", post(make_reservation))
        .route(
            "/:region/reservations/:reservation_id",
            axum::routing::delete(delete_reservation),
        )
        .route("/:region/bookings", post(confirm_booking))
        .route(
            "/:region/bookings/:booking_reference_id",
            get(get_booking).put(put_booking).delete(delete_booking),
        );

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_timeout))
                .timeout(request_timeout),
        )
}

async fn handle_timeout(err: BoxError) -> (StatusCode, Json<serde_json::Value>) {
    let (status, message) = if err.is::<tower::timeout::error::Elapsed>() {
        warn!("Request timed out");
        (StatusCode::REQUEST_TIMEOUT, "Request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled middleware error: {}", err),
        )
    };

    (
        status,
        Json(json!({ "code": status.as_u16(), "message": message })),
    )
}

/// HTTP server for the broker API
pub struct BrokerServer {
    config: ServerConfig,
    app: Router,
}

impl BrokerServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        let app = build_router(state, config.request_timeout);
        Self { config, app }
    }

    pub fn bind_addr(&self) -> BrokerResult<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| BrokerError::config(format!("Invalid bind address: {}", e)))
    }

    /// Serve until Ctrl-C
    #[instrument(skip(self))]
    pub async fn start(self) -> BrokerResult<()> {
        let bind_addr = self.bind_addr()?;
        info!("Starting broker HTTP server on {}", bind_addr);

        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            BrokerError::internal(format!("Failed to bind server to {}: {}", bind_addr, e))
        })?;

        info!("Broker HTTP server listening on {}", bind_addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| BrokerError::internal(format!("Server error: {}", e)))?;

        info!("Broker HTTP server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

/// Liveness plus a cache ping
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = match state.cache.health_check().await {
        Ok(true) => "ok",
        Ok(false) | Err(_) => "unavailable",
    };

    let health_info = json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": { "cache": cache },
    });

    (StatusCode::OK, Json(health_info))
}

async fn get_slots(
    State(state): State<AppState>,
    Path((region, test_centre_id)): Path<(String, String)>,
    Query(raw): Query<RawSlotQuery>,
) -> BrokerResult<Json<Vec<Slot>>> {
    let region = validate_region_id(&region)?;
    let query = validate_slot_query(&test_centre_id, &raw, Utc::now().date_naive())?;
    Ok(Json(state.slots.retrieve_slots(region, &query).await?))
}

async fn get_slots_by_week(
    State(state): State<AppState>,
    Path((region, test_centre_id)): Path<(String, String)>,
    Query(raw): Query<RawSlotQuery>,
) -> BrokerResult<Json<Vec<Slot>>> {
    let region = validate_region_id(&region)?;
    let query = validate_week_split_query(&test_centre_id, &raw, Utc::now().date_naive())?;
    Ok(Json(state.slots.retrieve_slots_by_week(region, &query).await?))
}

async fn make_reservation(
    State(state): State<AppState>,
    Path(region): Path<String>,
    body: Bytes,
) -> BrokerResult<Json<Vec<Reservation>>> {
    let region = validate_region_id(&region)?;
    let requests: Vec<ReservationRequest> = parse_json_array(&body)?;
    let now = Utc::now();
    for request in &requests {
        validate_reservation_request(request, now)?;
    }

    Ok(Json(state.reservations.make_reservation(region, &requests).await?))
}

async fn delete_reservation(
    State(state): State<AppState>,
    Path((region, reservation_id)): Path<(String, String)>,
) -> BrokerResult<StatusCode> {
    let region = validate_region_id(&region)?;
    validate_reservation_id(&reservation_id)?;
    state.reservations.delete_reservation(region, &reservation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn confirm_booking(
    State(state): State<AppState>,
    Path(region): Path<String>,
    body: Bytes,
) -> BrokerResult<Json<Vec<BookingResponse>>> {
    let region = validate_region_id(&region)?;
    let bookings: Vec<BookingRequest> = parse_json_array(&body)?;
    for booking in &bookings {
        validate_booking_request(booking)?;
    }

    Ok(Json(state.reservations.confirm_booking(region, &bookings).await?))
}

async fn get_booking(
    State(state): State<AppState>,
    Path((region, booking_reference_id)): Path<(String, String)>,
) -> BrokerResult<Json<BookingFullResponse>> {
    let region = validate_region_id(&region)?;
    validate_booking_reference_id(&booking_reference_id)?;
    Ok(Json(state.provider.get_booking(region, &booking_reference_id).await?))
}

async fn put_booking(
    State(state): State<AppState>,
    Path((region, booking_reference_id)): Path<(String, String)>,
    body: Bytes,
) -> BrokerResult<Json<BookingFullResponse>> {
    let region = validate_region_id(&region)?;
    validate_booking_reference_id(&booking_reference_id)?;
    let update: PutBookingRequest = parse_json_body(&body)?;
    validate_notes_and_behavioural_markers(&update.notes, &update.behavioural_markers)?;

    Ok(Json(
        state
            .provider
            .put_booking(region, &booking_reference_id, &update)
            .await?,
    ))
}

async fn delete_booking(
    State(state): State<AppState>,
    Path((region, booking_reference_id)): Path<(String, String)>,
) -> BrokerResult<StatusCode> {
    let region = validate_region_id(&region)?;
    validate_booking_reference_id(&booking_reference_id)?;
    state.provider.delete_booking(region, &booking_reference_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::InMemoryCache;
    use crate::observability::RecordingTelemetry;
    use crate::upstream::testing::FakeProvider;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Duration as ChronoDuration;
    use tower::ServiceExt;

    fn app(provider: FakeProvider) -> Router {
        let state = AppState::new(
            &BrokerConfig::default(),
            Arc::new(provider),
            SlotCache::new(Arc::new(InMemoryCache::new())),
            Arc::new(RecordingTelemetry::new()),
        );
        build_router(state, Duration::from_secs(5))
    }

    fn slot_uri(region: &str, days_ahead: i64) -> String {
        let from = Utc::now().date_naive() + ChronoDuration::days(days_ahead);
        let to = from + ChronoDuration::days(6);
        format!(
            "/api/v1/{}/testCentres/TC1/slots?testTypes=%5B%22CAR%22%5D&dateFrom={}&dateTo={}",
            region, from, to
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app(FakeProvider::default())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"]["cache"], "ok");
    }

    #[tokio::test]
    async fn test_invalid_region_is_bad_request() {
        let response = app(FakeProvider::default())
            .oneshot(Request::builder().uri(slot_uri("x", 1)).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn test_past_date_is_bad_request() {
        let provider = FakeProvider::default();
        let response = app(provider)
            .oneshot(Request::builder().uri(slot_uri("a", -2)).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_reservation_payload_is_bad_request() {
        let response = app(FakeProvider::default())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/a/reservations")
                    .header("content-type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_reservation_returns_no_content() {
        let response = app(FakeProvider::default())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/b/reservations/reservation-0001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_provider_error_status_is_forwarded() {
        let response = app(FakeProvider::default())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/a/bookings/B-000-000-001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_booking_requires_both_fields() {
        let response = app(FakeProvider::default())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/a/bookings/B-000-000-001")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"notes":""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
