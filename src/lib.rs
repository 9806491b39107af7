//! MongoDB Atlas Data Federation Query Log Forwarder
//!
//! Downloads the compressed query logs of a Data Federation instance and
//! forwards every entry to Azure Application Insights, throttled so the
//! ingestion endpoint is not overwhelmed.

pub mod artifact;
pub mod atlas;
pub mod config;
pub mod decoder;
pub mod digest;
pub mod emitter;
pub mod errors;
pub mod mapper;
pub mod pipeline;
pub mod telemetry;

pub use atlas::{AtlasClient, LogSourceDescriptor, ProjectInfo};
pub use config::{Config, SourceCredentials, ThrottleConfig};
pub use errors::{ForwarderError, Result};
pub use pipeline::{ForwardStats, Forwarder, RunOutcome, Stage};
pub use telemetry::{AppInsightsSink, SeverityLevel, TelemetryEvent, TelemetrySink};
