//! # Authenticated HTTP Client
//!
//! A thin wrapper over `reqwest` shared by the provider and CRM clients. It
//! attaches the bearer token, and it is the single place where a failed call
//! is classified into an [`UpstreamFailure`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::auth::TokenProvider;
use crate::core::error::{BrokerError, BrokerResult, UpstreamFailure};
use crate::observability::redact_secrets;

/// Error body shape used by both upstream services
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// `reqwest` client plus a token source
#[derive(Clone)]
pub struct AuthenticatedHttpClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl AuthenticatedHttpClient {
    pub fn new(timeout: Duration, tokens: Arc<dyn TokenProvider>) -> BrokerResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, tokens })
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.http.put(url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.http.patch(url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.http.delete(url)
    }

    /// Send a request with the bearer token attached
    ///
    /// Any non-2xx answer comes back as [`UpstreamFailure::Http`] carrying the
    /// body's `message` (or the raw body) and the `Retry-After` header.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, UpstreamFailure> {
        let token = self
            .tokens
            .bearer_token()
            .await
            .map_err(|e| UpstreamFailure::Unknown {
                message: format!("bearer token unavailable: {}", e),
            })?;

        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        debug!("Upstream responded with status {}", status);

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody {
                message: Some(message),
            }) => message,
            _ if body.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("upstream error")
                .to_string(),
            _ => body,
        };

        Err(UpstreamFailure::http(
            status.as_u16(),
            redact_secrets(&message),
            retry_after,
        ))
    }

    /// Send a request and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, UpstreamFailure> {
        let response = self.send(request).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| UpstreamFailure::Unknown {
            message: format!("failed to decode response body: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::auth::StaticTokenProvider;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> AuthenticatedHttpClient {
        AuthenticatedHttpClient::new(
            Duration::from_secs(5),
            Arc::new(StaticTokenProvider::new("test-token")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sends_bearer_token_and_decodes_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": 7 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client();
        let body: serde_json::Value = client
            .send_json(client.get(&format!("{}/ping", server.uri())))
            .await
            .unwrap();

        assert_eq!(body["data"], 7);
    }

    #[tokio::test]
    async fn test_error_status_is_classified_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "30")
                    .set_body_json(serde_json::json!({ "message": "Too many requests" })),
            )
            .mount(&server)
            .await;

        let client = test_client();
        let err = client
            .send(client.get(&format!("{}/busy", server.uri())))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            UpstreamFailure::http(429, "Too many requests", Some("30".to_string()))
        );
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = test_client();
        let err = client
            .send(client.delete(&format!("{}/gone", server.uri())))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(err, UpstreamFailure::http(500, "boom", None));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = test_client();
        let err = client
            .send_json::<serde_json::Value>(client.get(&server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamFailure::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network() {
        let client = test_client();
        let err = client
            .send(client.get("http://127.0.0.1:1/unreachable"))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamFailure::Network { .. }));
        assert_eq!(err.status(), None);
    }
}
