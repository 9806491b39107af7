//! Telemetry events and the backend they are shipped to

use crate::errors::{ForwarderError, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com";

/// Dimension value identifying where every event came from
pub const SOURCE_TAG: &str = "MongoDB Data Federation";

/// Dimension value identifying the kind of log every event carries
pub const LOG_TYPE_TAG: &str = "MongoDBDF";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SeverityLevel {
    Information,
    Warning,
    Error,
}

impl SeverityLevel {
    /// Application Insights `severityLevel` code
    pub fn code(self) -> u8 {
        match self {
            SeverityLevel::Information => 1,
            SeverityLevel::Warning => 2,
            SeverityLevel::Error => 3,
        }
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityLevel::Information => write!(f, "INFO"),
            SeverityLevel::Warning => write!(f, "WARN"),
            SeverityLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<&str> for SeverityLevel {
    /// Maps a MongoDB log severity code. Exact and case-sensitive.
    fn from(code: &str) -> Self {
        match code {
            "F" | "E" => SeverityLevel::Error,
            "W" => SeverityLevel::Warning,
            _ => SeverityLevel::Information,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    pub message: String,
    pub severity: SeverityLevel,
    pub dimensions: HashMap<String, Value>,
}

impl TelemetryEvent {
    pub fn new(message: impl Into<String>, severity: SeverityLevel) -> Self {
        Self {
            message: message.into(),
            severity,
            dimensions: HashMap::new(),
        }
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Adds the three dimensions shared by every event of a run
    pub fn with_run_dimensions(self, target_resource: &str) -> Self {
        self.with_dimension("source", SOURCE_TAG)
            .with_dimension("log_type", LOG_TYPE_TAG)
            .with_dimension("target_resource", target_resource)
    }

    /// Event sent once before forwarding to prove the backend accepts data
    pub fn connection_test(target_resource: &str) -> Self {
        TelemetryEvent::new(
            "Connection test from MongoDB Data Federation log forwarder",
            SeverityLevel::Information,
        )
        .with_dimension("test", true)
        .with_run_dimensions(target_resource)
    }
}

/// Destination for telemetry events.
///
/// A single sink is built at startup and passed by reference to everything
/// that emits.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Parsed Application Insights connection string
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionString {
    pub instrumentation_key: String,
    pub ingestion_endpoint: String,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` pairs. Keys are case-insensitive.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut instrumentation_key = None;
        let mut ingestion_endpoint = None;

        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ForwarderError::Config(format!(
                    "malformed connection string segment: {}",
                    pair
                )));
            };

            match key.trim().to_lowercase().as_str() {
                "instrumentationkey" => instrumentation_key = Some(value.trim().to_string()),
                "ingestionendpoint" => {
                    ingestion_endpoint = Some(value.trim().trim_end_matches('/').to_string())
                }
                _ => {}
            }
        }

        let instrumentation_key = instrumentation_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ForwarderError::Config("connection string has no InstrumentationKey".to_string())
            })?;

        Ok(Self {
            instrumentation_key,
            ingestion_endpoint: ingestion_endpoint
                .unwrap_or_else(|| DEFAULT_INGESTION_ENDPOINT.to_string()),
        })
    }

    pub fn track_url(&self) -> String {
        format!("{}/v2/track", self.ingestion_endpoint)
    }
}

/// Sends events to the Application Insights track endpoint, one envelope per event
#[derive(Debug, Clone)]
pub struct AppInsightsSink {
    client: Client,
    connection: ConnectionString,
}

impl AppInsightsSink {
    pub fn new(connection_string: &str, timeout: Duration) -> Result<Self> {
        let connection = ConnectionString::parse(connection_string)?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("atlas_log_forwarder/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ForwarderError::Http)?;

        Ok(Self { client, connection })
    }

    pub fn endpoint(&self) -> &str {
        &self.connection.ingestion_endpoint
    }

    fn envelope(&self, event: &TelemetryEvent) -> Value {
        let properties: HashMap<&str, String> = event
            .dimensions
            .iter()
            .map(|(key, value)| (key.as_str(), property_value(value)))
            .collect();

        json!({
            "name": "Microsoft.ApplicationInsights.Message",
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "iKey": self.connection.instrumentation_key,
            "data": {
                "baseType": "MessageData",
                "baseData": {
                    "ver": 2,
                    "message": event.message,
                    "severityLevel": event.severity.code(),
                    "properties": properties,
                }
            }
        })
    }
}

#[async_trait]
impl TelemetrySink for AppInsightsSink {
    async fn send(&self, event: &TelemetryEvent) -> Result<()> {
        let url = self.connection.track_url();
        let body = Value::Array(vec![self.envelope(event)]);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ForwarderError::Telemetry(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        let receipt: Option<TrackResponse> = response.json().await.ok();

        if !status.is_success() {
            return Err(ForwarderError::Telemetry(format!(
                "ingestion endpoint returned {}",
                status
            )));
        }

        if let Some(receipt) = receipt {
            if receipt.items_accepted < receipt.items_received {
                let reason = receipt
                    .errors
                    .first()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "unknown reason".to_string());
                return Err(ForwarderError::Telemetry(format!(
                    "{} of {} items rejected: {}",
                    receipt.items_received - receipt.items_accepted,
                    receipt.items_received,
                    reason
                )));
            }
        }

        debug!("Event accepted by ingestion endpoint ({})", status);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackResponse {
    #[serde(default)]
    items_received: u64,
    #[serde(default)]
    items_accepted: u64,
    #[serde(default)]
    errors: Vec<TrackError>,
}

#[derive(Debug, Deserialize)]
struct TrackError {
    #[serde(default)]
    message: String,
}

/// Custom properties must be strings; non-string values are sent as JSON text
fn property_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_code() {
        assert_eq!(SeverityLevel::from("F"), SeverityLevel::Error);
        assert_eq!(SeverityLevel::from("E"), SeverityLevel::Error);
        assert_eq!(SeverityLevel::from("W"), SeverityLevel::Warning);
        assert_eq!(SeverityLevel::from("I"), SeverityLevel::Information);
        assert_eq!(SeverityLevel::from("D1"), SeverityLevel::Information);
        assert_eq!(SeverityLevel::from("e"), SeverityLevel::Information);
        assert_eq!(SeverityLevel::from(""), SeverityLevel::Information);
    }

    #[test]
    fn test_connection_string_parsing() {
        let parsed = ConnectionString::parse(
            "InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=https://westus2-1.in.applicationinsights.azure.com/;LiveEndpoint=https://westus2.livediagnostics.monitor.azure.com/",
        )
        .unwrap();

        assert_eq!(parsed.instrumentation_key, "00000000-0000-0000-0000-000000000000");
        assert_eq!(
            parsed.track_url(),
            "https://westus2-1.in.applicationinsights.azure.com/v2/track"
        );
    }

    #[test]
    fn test_connection_string_defaults_endpoint() {
        let parsed = ConnectionString::parse("instrumentationkey=abc").unwrap();
        assert_eq!(parsed.ingestion_endpoint, DEFAULT_INGESTION_ENDPOINT);
    }

    #[test]
    fn test_connection_string_requires_key() {
        assert!(ConnectionString::parse("IngestionEndpoint=https://example.com").is_err());
        assert!(ConnectionString::parse("garbage").is_err());
    }

    #[test]
    fn test_connection_test_event() {
        let event = TelemetryEvent::connection_test("my-insights");

        assert_eq!(event.severity, SeverityLevel::Information);
        assert_eq!(event.dimensions["test"], Value::Bool(true));
        assert_eq!(event.dimensions["source"], SOURCE_TAG);
        assert_eq!(event.dimensions["log_type"], LOG_TYPE_TAG);
        assert_eq!(event.dimensions["target_resource"], "my-insights");
    }

    #[test]
    fn test_envelope_shape() {
        let sink = AppInsightsSink::new("InstrumentationKey=abc", Duration::from_secs(5)).unwrap();
        let event = TelemetryEvent::new("disk full", SeverityLevel::Error)
            .with_dimension("attributes", json!({"bytes": 12}))
            .with_dimension("component", Value::Null);

        let envelope = sink.envelope(&event);

        assert_eq!(envelope["iKey"], "abc");
        assert_eq!(envelope["data"]["baseType"], "MessageData");
        assert_eq!(envelope["data"]["baseData"]["message"], "disk full");
        assert_eq!(envelope["data"]["baseData"]["severityLevel"], 3);
        assert_eq!(envelope["data"]["baseData"]["properties"]["attributes"], r#"{"bytes":12}"#);
        assert_eq!(envelope["data"]["baseData"]["properties"]["component"], "");
    }
}
