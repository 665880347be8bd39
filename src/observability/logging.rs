//! # Structured Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! ## Key Features
//! - JSON or plain text output
//! - `RUST_LOG` takes precedence over the configured level
//! - Bearer token redaction for upstream error bodies that end up in logs

use std::sync::OnceLock;

use regex::Regex;
use tracing::{warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialise the global subscriber
///
/// Calling this twice is harmless: the second call logs a warning and keeps
/// the subscriber that is already installed.
pub fn init_logging(config: &LoggingConfig) {
    let level = parse_level(&config.level);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let result = if config.format.eq_ignore_ascii_case("json") {
        Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    if result.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }
}

fn bearer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-._~+/]+=*").expect("bearer token pattern is valid")
    })
}

/// Replace bearer tokens with `[REDACTED]`
pub fn redact_secrets(text: &str) -> String {
    bearer_pattern()
        .replace_all(text, "Bearer [REDACTED]")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_defaults_to_info() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("chatty"), Level::INFO);
    }

    #[test]
    fn test_redact_secrets() {
        let redacted = redact_secrets("401 from upstream, sent Authorization: Bearer abc.def-123=");
        assert_eq!(redacted, "401 from upstream, sent Authorization: Bearer [REDACTED]");
        assert_eq!(redact_secrets("no secrets here"), "no secrets here");
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: "text".to_string(),
        };
        init_logging(&config);
        init_logging(&config);
    }
}
