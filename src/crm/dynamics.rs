//! # Dynamics CRM Client
//!
//! [`CrmGateway`] over the Dynamics OData Web API. Raw records use the CRM's
//! logical names and are mapped to domain types here, so nothing outside
//! this file knows a `ftts_*` field.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};
use url::Url;

use super::CrmGateway;
use crate::core::config::CrmConfig;
use crate::core::error::{BrokerError, BrokerResult, UpstreamFailure};
use crate::core::types::{BehaviouralMarker, BookingProduct, Region};
use crate::observability::telemetry::{crm_status_event, properties, Telemetry};
use crate::upstream::{AuthenticatedHttpClient, StaticTokenProvider};

const BOOKING_PRODUCTS: &str = "ftts_bookingproducts";
const BEHAVIOURAL_MARKERS: &str = "ftts_behaviouralmarkers";

/// `ftts_bookingstatus` option value for a cancelled booking
pub const BOOKING_STATUS_CANCELLED: i64 = 675_030_008;

const BOOKING_PRODUCT_FIELDS: &[&str] = &[
    "ftts_bookingproductid",
    "_ftts_bookingid_value",
    "_ftts_candidateid_value",
    "ftts_reference",
    "ftts_tcnslotdataupdatedon",
    "ftts_tcn_update_date",
    "ftts_testdate",
];

const BEHAVIOURAL_MARKER_FIELDS: &[&str] = &[
    "ftts_behaviouralmarkerid",
    "_ftts_personid_value",
    "_ftts_caseid_value",
    "ftts_description",
    "ftts_removalreason",
    "ftts_removalreasondetails",
    "ftts_updatereason",
    "ftts_updatereasondetails",
    "ftts_blockedfrombookingonline",
    "ftts_startdate",
    "ftts_enddate",
];

const REGION_EXPAND: &str =
    "ftts_bookingid($expand=ftts_testcentre($expand=parentaccountid($select=ftts_regiona,ftts_regionb,ftts_regionc)))";

#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrmBookingProduct {
    ftts_bookingproductid: String,
    #[serde(rename = "_ftts_bookingid_value")]
    booking_id: String,
    #[serde(rename = "_ftts_candidateid_value")]
    candidate_id: Option<String>,
    ftts_reference: String,
    ftts_testdate: Option<String>,
    ftts_tcnslotdataupdatedon: Option<String>,
    ftts_tcn_update_date: Option<String>,
    ftts_bookingid: Option<CrmBooking>,
}

#[derive(Debug, Deserialize)]
struct CrmBooking {
    ftts_testcentre: Option<CrmTestCentre>,
}

#[derive(Debug, Deserialize)]
struct CrmTestCentre {
    accountid: Option<String>,
    parentaccountid: Option<CrmRegionFlags>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmRegionFlags {
    ftts_regiona: Option<bool>,
    ftts_regionb: Option<bool>,
    ftts_regionc: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CrmBehaviouralMarker {
    ftts_behaviouralmarkerid: String,
    #[serde(rename = "_ftts_personid_value")]
    person_id: String,
    #[serde(rename = "_ftts_caseid_value")]
    case_id: Option<String>,
    ftts_description: Option<String>,
    ftts_removalreason: Option<i64>,
    ftts_removalreasondetails: Option<String>,
    ftts_updatereason: Option<i64>,
    ftts_updatereasondetails: Option<String>,
    ftts_blockedfrombookingonline: Option<bool>,
    ftts_startdate: Option<String>,
    ftts_enddate: Option<String>,
}

/// Parse a CRM timestamp: either a full RFC 3339 instant or a bare date,
/// which is taken as midnight UTC
fn parse_crm_instant(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// First region flag set on the test centre's parent account
fn resolve_region(booking: Option<&CrmBooking>) -> Result<Region, String> {
    let centre = booking.and_then(|b| b.ftts_testcentre.as_ref());
    let flags = centre
        .and_then(|c| c.parentaccountid.as_ref())
        .ok_or_else(|| "test centre or its parent account is missing".to_string())?;

    let regions = [
        (flags.ftts_regiona, Region::A),
        (flags.ftts_regionb, Region::B),
        (flags.ftts_regionc, Region::C),
    ];
    regions
        .into_iter()
        .find(|(flag, _)| flag.unwrap_or(false))
        .map(|(_, region)| region)
        .ok_or_else(|| {
            format!(
                "all region values are false or missing on test centre {}",
                centre
                    .and_then(|c| c.accountid.as_deref())
                    .unwrap_or("<unknown>")
            )
        })
}

/// Decode each record on its own, logging and skipping the ones that do not fit
fn decode_records<T: DeserializeOwned>(id_field: &str, records: Vec<serde_json::Value>) -> Vec<T> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record
                .get(id_field)
                .and_then(|v| v.as_str())
                .unwrap_or("<unknown>")
                .to_string();
            match serde_json::from_value(record) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    error!(record_id = %id, error = %e, "Malformed CRM record, skipping");
                    None
                }
            }
        })
        .collect()
}

fn map_booking_product(raw: CrmBookingProduct) -> Result<BookingProduct, String> {
    let region = resolve_region(raw.ftts_bookingid.as_ref())?;
    Ok(BookingProduct {
        id: raw.ftts_bookingproductid,
        booking_id: raw.booking_id,
        candidate_id: raw.candidate_id,
        reference: raw.ftts_reference,
        test_date: parse_crm_instant(raw.ftts_testdate.as_deref()),
        tcn_slot_data_updated_on: parse_crm_instant(raw.ftts_tcnslotdataupdatedon.as_deref()),
        tcn_update_date: parse_crm_instant(raw.ftts_tcn_update_date.as_deref()),
        region,
    })
}

fn map_behavioural_marker(raw: CrmBehaviouralMarker) -> BehaviouralMarker {
    BehaviouralMarker {
        id: raw.ftts_behaviouralmarkerid,
        candidate_id: raw.person_id,
        start_date: parse_crm_instant(raw.ftts_startdate.as_deref()),
        end_date: parse_crm_instant(raw.ftts_enddate.as_deref()),
        case_id: raw.case_id,
        description: raw.ftts_description,
        removal_reason: raw.ftts_removalreason,
        removal_reason_details: raw.ftts_removalreasondetails,
        update_reason: raw.ftts_updatereason,
        update_reason_details: raw.ftts_updatereasondetails,
        blocked_from_booking_online: raw.ftts_blockedfrombookingonline,
    }
}

/// `$filter` selecting booking products that still need a push
pub fn unsynced_products_filter(today: NaiveDate) -> String {
    let start_of_day = today
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default();

    [
        "ftts_tcnslotdataupdatedon ne null".to_string(),
        "_ftts_candidateid_value ne null".to_string(),
        "ftts_tcnslotdataupdatedon gt ftts_tcn_update_date".to_string(),
        format!("ftts_bookingstatus ne {}", BOOKING_STATUS_CANCELLED),
        format!(
            "Microsoft.Dynamics.CRM.OnOrAfter(PropertyName='ftts_testdate',PropertyValue='{}')",
            start_of_day
        ),
    ]
    .join(" and ")
}

/// `$filter` selecting the markers of a set of candidates
pub fn markers_filter(candidate_ids: &[String]) -> String {
    candidate_ids
        .iter()
        .map(|id| format!("_ftts_personid_value eq '{}'", id.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Dynamics Web API client
pub struct DynamicsCrmClient {
    client: AuthenticatedHttpClient,
    config: CrmConfig,
    telemetry: Arc<dyn Telemetry>,
}

impl DynamicsCrmClient {
    pub fn new(
        client: AuthenticatedHttpClient,
        config: CrmConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            client,
            config,
            telemetry,
        }
    }

    pub fn from_config(config: &CrmConfig, telemetry: Arc<dyn Telemetry>) -> BrokerResult<Self> {
        let tokens = Arc::new(StaticTokenProvider::new(config.bearer_token.clone()));
        let client = AuthenticatedHttpClient::new(config.request_timeout, tokens)?;
        Ok(Self::new(client, config.clone(), telemetry))
    }

    fn collection_url(&self, collection: &str) -> BrokerResult<Url> {
        let raw = format!("{}/{}", self.config.base_url.trim_end_matches('/'), collection);
        Url::parse(&raw).map_err(|e| BrokerError::config(format!("Invalid CRM URL {}: {}", raw, e)))
    }

    fn failed(&self, operation: &'static str, failure: UpstreamFailure) -> BrokerError {
        let status = failure.status();
        let event = crm_status_event(status);
        self.telemetry.event(
            event,
            &format!("{}: CRM request failed", operation),
            properties([
                ("operation", operation.to_string()),
                ("status", status.map(|s| s.to_string()).unwrap_or_default()),
            ]),
        );
        error!(operation, status = ?status, error = %failure, "CRM request failed");
        BrokerError::Crm { failure }
    }

    /// GET a collection query and follow `@odata.nextLink` to the end
    async fn retrieve_all<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        first_page: Url,
    ) -> BrokerResult<Vec<T>> {
        let mut records = Vec::new();
        let mut next = Some(first_page.to_string());

        while let Some(url) = next {
            debug!("CRM request: {}", url);
            let page: ODataPage<T> = self
                .client
                .send_json(
                    self.client
                        .get(&url)
                        .header("Accept", "application/json")
                        .header("OData-MaxVersion", "4.0")
                        .header("OData-Version", "4.0"),
                )
                .await
                .map_err(|e| self.failed(operation, e))?;

            records.extend(page.value);
            next = page.next_link;
        }

        Ok(records)
    }
}

#[async_trait]
impl CrmGateway for DynamicsCrmClient {
    async fn get_unsynced_booking_products(&self) -> BrokerResult<Vec<BookingProduct>> {
        let mut url = self.collection_url(BOOKING_PRODUCTS)?;
        url.query_pairs_mut()
            .append_pair("$select", &BOOKING_PRODUCT_FIELDS.join(","))
            .append_pair("$filter", &unsynced_products_filter(Utc::now().date_naive()))
            .append_pair("$expand", REGION_EXPAND);

        let raw: Vec<serde_json::Value> =
            self.retrieve_all("get_unsynced_booking_products", url).await?;

        let mut products = Vec::with_capacity(raw.len());
        for record in decode_records::<CrmBookingProduct>("ftts_bookingproductid", raw) {
            let id = record.ftts_bookingproductid.clone();
            match map_booking_product(record) {
                Ok(product) => products.push(product),
                Err(reason) => {
                    error!(
                        booking_product_id = %id,
                        "Error mapping CRM booking product, skipping record: {}",
                        reason
                    );
                }
            }
        }

        info!(count = products.len(), "Retrieved unsynced booking products");
        Ok(products)
    }

    async fn get_behavioural_markers_batch(
        &self,
        candidate_ids: &[String],
    ) -> BrokerResult<Vec<BehaviouralMarker>> {
        let mut markers = Vec::new();

        for chunk in candidate_ids.chunks(self.config.batch_size.max(1)) {
            let mut url = self.collection_url(BEHAVIOURAL_MARKERS)?;
            url.query_pairs_mut()
                .append_pair("$select", &BEHAVIOURAL_MARKER_FIELDS.join(","))
                .append_pair("$filter", &markers_filter(chunk));

            let raw: Vec<serde_json::Value> =
                self.retrieve_all("get_behavioural_markers_batch", url).await?;
            markers.extend(
                decode_records::<CrmBehaviouralMarker>("ftts_behaviouralmarkerid", raw)
                    .into_iter()
                    .map(map_behavioural_marker),
            );
        }

        debug!(
            candidates = candidate_ids.len(),
            markers = markers.len(),
            "Retrieved behavioural markers"
        );
        Ok(markers)
    }

    async fn update_tcn_update_date(&self, booking_product_id: &str) -> BrokerResult<()> {
        let url = self.collection_url(&format!("{}({})", BOOKING_PRODUCTS, booking_product_id))?;
        let body = json!({
            "ftts_tcn_update_date": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        self.client
            .send(
                self.client
                    .patch(url.as_str())
                    .header("OData-MaxVersion", "4.0")
                    .header("OData-Version", "4.0")
                    .json(&body),
            )
            .await
            .map_err(|e| self.failed("update_tcn_update_date", e))?;

        debug!(booking_product_id, "Stamped TCN update date");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::telemetry::{BusinessEvent, RecordingTelemetry};
    use chrono::TimeZone;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str, batch_size: usize, telemetry: Arc<RecordingTelemetry>) -> DynamicsCrmClient {
        let http = AuthenticatedHttpClient::new(
            Duration::from_secs(5),
            Arc::new(StaticTokenProvider::new("crm-token")),
        )
        .unwrap();
        DynamicsCrmClient::new(
            http,
            CrmConfig {
                base_url: format!("{}/api/data/v9.1", uri),
                bearer_token: "crm-token".to_string(),
                batch_size,
                request_timeout: Duration::from_secs(5),
            },
            telemetry,
        )
    }

    fn product_json(id: &str, reference: &str, flags: (bool, bool, bool)) -> serde_json::Value {
        json!({
            "ftts_bookingproductid": id,
            "_ftts_bookingid_value": "booking-1",
            "_ftts_candidateid_value": "candidate-1",
            "ftts_reference": reference,
            "ftts_testdate": "2020-12-24T09:45:00Z",
            "ftts_tcnslotdataupdatedon": "2020-12-24T09:55:00Z",
            "ftts_tcn_update_date": "2020-12-24T09:45:00Z",
            "ftts_bookingid": {
                "ftts_testcentre": {
                    "accountid": "centre-1",
                    "parentaccountid": {
                        "ftts_regiona": flags.0,
                        "ftts_regionb": flags.1,
                        "ftts_regionc": flags.2
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_crm_instant() {
        assert_eq!(
            parse_crm_instant(Some("2021-04-01")),
            Some(Utc.with_ymd_and_hms(2021, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_crm_instant(Some("2020-12-24T09:45:00Z")),
            Some(Utc.with_ymd_and_hms(2020, 12, 24, 9, 45, 0).unwrap())
        );
        assert_eq!(parse_crm_instant(Some("soon")), None);
        assert_eq!(parse_crm_instant(None), None);
    }

    #[test]
    fn test_unsynced_filter_uses_start_of_day() {
        let filter = unsynced_products_filter(NaiveDate::from_ymd_opt(2021, 4, 2).unwrap());
        assert!(filter.contains("PropertyValue='2021-04-02T00:00:00.000Z'"));
        assert!(filter.contains(&format!("ftts_bookingstatus ne {}", BOOKING_STATUS_CANCELLED)));
        assert!(filter.starts_with("ftts_tcnslotdataupdatedon ne null and "));
    }

    #[test]
    fn test_markers_filter_quotes_ids() {
        let ids = vec!["a".to_string(), "o'b".to_string()];
        assert_eq!(
            markers_filter(&ids),
            "_ftts_personid_value eq 'a' or _ftts_personid_value eq 'o''b'"
        );
    }

    #[tokio::test]
    async fn test_malformed_product_is_skipped() {
        let server = MockServer::start().await;
        let mut broken = product_json("bp-2", "B-000-000-002", (true, false, false));
        broken["ftts_reference"] = serde_json::Value::Null;
        Mock::given(method("GET"))
            .and(path("/api/data/v9.1/ftts_bookingproducts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    product_json("bp-1", "B-000-000-001", (true, false, false)),
                    broken,
                    null
                ]
            })))
            .mount(&server)
            .await;

        let crm = client(&server.uri(), 50, Arc::new(RecordingTelemetry::new()));
        let products = crm.get_unsynced_booking_products().await.unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, "bp-1");
        assert_eq!(products[0].region, Region::A);
    }

    #[tokio::test]
    async fn test_malformed_marker_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/v9.1/ftts_behaviouralmarkers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {
                        "ftts_behaviouralmarkerid": "bm-1",
                        "_ftts_personid_value": "candidate-1",
                        "ftts_startdate": "2021-04-01",
                        "ftts_enddate": "2021-04-23"
                    },
                    {
                        "ftts_behaviouralmarkerid": "bm-2",
                        "_ftts_personid_value": null
                    }
                ]
            })))
            .mount(&server)
            .await;

        let crm = client(&server.uri(), 50, Arc::new(RecordingTelemetry::new()));
        let markers = crm
            .get_behavioural_markers_batch(&["candidate-1".to_string()])
            .await
            .unwrap();

        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id, "bm-1");
    }

    #[tokio::test]
    async fn test_unsynced_products_are_mapped_and_paged() {
        let server = MockServer::start().await;
        let next = format!("{}/api/data/v9.1/ftts_bookingproducts?page=2", server.uri());

        Mock::given(method("GET"))
            .and(path("/api/data/v9.1/ftts_bookingproducts"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [product_json("bp-3", "B-000-000-003", (false, false, true))]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/data/v9.1/ftts_bookingproducts"))
            .and(header("authorization", "Bearer crm-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    product_json("bp-1", "B-000-000-001", (false, true, false)),
                    product_json("bp-2", "B-000-000-002", (false, false, false))
                ],
                "@odata.nextLink": next
            })))
            .mount(&server)
            .await;

        let crm = client(&server.uri(), 50, Arc::new(RecordingTelemetry::new()));
        let products = crm.get_unsynced_booking_products().await.unwrap();

        assert_eq!(products.len(), 2);
        assert_eq!(products[0].id, "bp-1");
        assert_eq!(products[0].region, Region::B);
        assert_eq!(products[0].candidate_id.as_deref(), Some("candidate-1"));
        assert_eq!(
            products[0].test_date,
            Some(Utc.with_ymd_and_hms(2020, 12, 24, 9, 45, 0).unwrap())
        );
        assert_eq!(products[1].id, "bp-3");
        assert_eq!(products[1].region, Region::C);
    }

    #[tokio::test]
    async fn test_markers_are_fetched_in_chunks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/data/v9.1/ftts_behaviouralmarkers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "ftts_behaviouralmarkerid": "bm-1",
                    "_ftts_personid_value": "candidate-1",
                    "ftts_description": "Caught cheating",
                    "ftts_startdate": "2021-04-01",
                    "ftts_enddate": "2021-04-23"
                }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let crm = client(&server.uri(), 2, Arc::new(RecordingTelemetry::new()));
        let ids: Vec<String> = ["c1", "c2", "c3"].iter().map(|s| s.to_string()).collect();
        let markers = crm.get_behavioural_markers_batch(&ids).await.unwrap();

        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].candidate_id, "candidate-1");
        assert_eq!(
            markers[0].end_date,
            Some(Utc.with_ymd_and_hms(2021, 4, 23, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_no_candidates_means_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let crm = client(&server.uri(), 50, Arc::new(RecordingTelemetry::new()));
        assert!(crm.get_behavioural_markers_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_tcn_update_date_patches_product() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/api/data/v9.1/ftts_bookingproducts(bp-1)"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let crm = client(&server.uri(), 50, Arc::new(RecordingTelemetry::new()));
        crm.update_tcn_update_date("bp-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_crm_failures_emit_events() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let telemetry = Arc::new(RecordingTelemetry::new());
        let crm = client(&server.uri(), 50, telemetry.clone());

        let err = crm.update_tcn_update_date("bp-1").await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(crm.get_unsynced_booking_products().await.is_err());

        assert_eq!(telemetry.count(BusinessEvent::BmsCdsAuthError), 1);
        assert_eq!(telemetry.count(BusinessEvent::BmsCdsFail), 1);
    }
}
