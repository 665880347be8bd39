// Structured logging
pub mod logging;

// Business events
pub mod telemetry;

pub use logging::{init_logging, redact_secrets};
pub use telemetry::{BusinessEvent, RecordingTelemetry, Telemetry, TracingTelemetry};
