//! # Error Handling Module
//!
//! Error types for the broker, built on `thiserror`.
//!
//! Two enums live here:
//! - [`UpstreamFailure`] is the one place where a failed call to the booking
//!   provider or the CRM is classified. Every transport or HTTP error is turned
//!   into `Network`, `Http` or `Unknown` before anything else looks at it.
//! - [`BrokerError`] is the crate-wide error. It knows its HTTP status code and
//!   renders itself as a JSON `{ code, message }` body through axum.
//!
//! Cache failures have their own type in `caching` and never reach this enum:
//! the slot pipeline and the invalidator log and swallow them.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the broker
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Normalised failure of an outbound HTTP call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// The request never produced a response (DNS, connect, timeout, reset)
    #[error("network error: {message}")]
    Network { message: String },

    /// The peer answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after: Option<String>,
    },

    /// Anything else, e.g. an undecodable body
    #[error("unknown error: {message}")]
    Unknown { message: String },
}

impl UpstreamFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Build an HTTP failure from a status and the response body
    pub fn http<S: Into<String>>(status: u16, message: S, retry_after: Option<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            retry_after,
        }
    }
}

impl From<reqwest::Error> for UpstreamFailure {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
                retry_after: None,
            };
        }

        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Network {
                message: err.to_string(),
            }
        } else {
            Self::Unknown {
                message: err.to_string(),
            }
        }
    }
}

/// Error types for the broker
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Request validation errors (bad parameter, out of range date, etc.)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// A booking provider status that is in the operation's known set
    #[error("TCN error {status}: {message}")]
    Tcn {
        status: u16,
        message: String,
        retry_after: Option<String>,
    },

    /// Any other failure talking to an upstream service
    #[error("Upstream error ({service}): {failure}")]
    Upstream {
        service: String,
        failure: UpstreamFailure,
    },

    /// Failure talking to the CRM
    #[error("CRM error: {failure}")]
    Crm { failure: UpstreamFailure },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl BrokerError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error for a named request field
    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn upstream<S: Into<String>>(service: S, failure: UpstreamFailure) -> Self {
        Self::Upstream {
            service: service.into(),
            failure,
        }
    }

    /// HTTP status reported by the provider or the CRM, if any
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Tcn { status, .. } => Some(*status),
            Self::Upstream { failure, .. } | Self::Crm { failure } => failure.status(),
            _ => None,
        }
    }

    /// True for 401 and 403 from an upstream service
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.upstream_status(), Some(401) | Some(403))
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::Tcn { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Crm { .. } => StatusCode::BAD_GATEWAY,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for logs
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::Tcn { .. } => "tcn_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Crm { .. } => "crm_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for BrokerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Errors render as `{ "code": <status>, "message": <text> }`
///
/// A `Retry-After` value received from the provider is passed back to the
/// caller as a header.
impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = match &self {
            Self::Tcn { retry_after, .. } => retry_after.clone(),
            _ => None,
        };

        let body = json!({
            "code": status.as_u16(),
            "message": self.to_string(),
        });

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after.and_then(|v| HeaderValue::from_str(&v).ok()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcn_error_keeps_provider_status() {
        let err = BrokerError::Tcn {
            status: 429,
            message: "slow down".to_string(),
            retry_after: Some("30".to_string()),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.upstream_status(), Some(429));
        assert!(!err.is_auth_failure());
    }

    #[test]
    fn test_auth_failure_detection() {
        let forbidden = BrokerError::upstream("tcn", UpstreamFailure::http(403, "denied", None));
        assert!(forbidden.is_auth_failure());
        assert_eq!(forbidden.status_code(), StatusCode::BAD_GATEWAY);

        let network = BrokerError::Crm {
            failure: UpstreamFailure::Network {
                message: "connection reset".to_string(),
            },
        };
        assert!(!network.is_auth_failure());
        assert_eq!(network.upstream_status(), None);
    }

    #[test]
    fn test_validation_error_is_bad_request() {
        let err = BrokerError::validation("dateFrom", "Invalid date");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "request_validation_error");
    }

    #[test]
    fn test_retry_after_header_is_forwarded() {
        let err = BrokerError::Tcn {
            status: 503,
            message: "maintenance".to_string(),
            retry_after: Some("120".to_string()),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "120");
    }
}
