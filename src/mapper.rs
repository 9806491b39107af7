//! Maps MongoDB structured log lines to telemetry events

use crate::telemetry::{SOURCE_TAG, SeverityLevel, TelemetryEvent};
use serde_json::{Map, Value};
use std::fmt;

/// Longest prefix of an offending line kept for diagnostics
pub const LINE_EXCERPT_CHARS: usize = 500;

/// A log line that is not a JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line_excerpt: String,
}

impl ParseError {
    fn new(message: impl Into<String>, line: &str) -> Self {
        Self {
            message: message.into(),
            line_excerpt: line.chars().take(LINE_EXCERPT_CHARS).collect(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Turns raw query log lines into events tagged for one target resource
#[derive(Debug, Clone)]
pub struct TelemetryMapper {
    target_resource: String,
    default_message: String,
}

impl TelemetryMapper {
    pub fn new(target_resource: impl Into<String>) -> Self {
        Self {
            target_resource: target_resource.into(),
            default_message: format!("{} Log", SOURCE_TAG),
        }
    }

    pub fn map_record(&self, line: &str) -> Result<TelemetryEvent, ParseError> {
        let json: Value =
            serde_json::from_str(line).map_err(|e| ParseError::new(e.to_string(), line))?;

        let Value::Object(record) = json else {
            return Err(ParseError::new("log line is not a JSON object", line));
        };

        Ok(self.map_object(&record))
    }

    fn map_object(&self, record: &Map<String, Value>) -> TelemetryEvent {
        let field = |name: &str| record.get(name).cloned().unwrap_or(Value::Null);

        let message = match record.get("msg") {
            Some(Value::String(msg)) => msg.clone(),
            Some(Value::Null) | None => self.default_message.clone(),
            Some(other) => other.to_string(),
        };

        let severity = record
            .get("s")
            .and_then(Value::as_str)
            .map(SeverityLevel::from)
            .unwrap_or(SeverityLevel::Information);

        let timestamp = record
            .get("t")
            .and_then(|t| t.get("$date"))
            .cloned()
            .unwrap_or(Value::Null);

        let attributes = record
            .get("attr")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        TelemetryEvent::new(message, severity)
            .with_dimension("mongodb_timestamp", timestamp)
            .with_dimension("severity", field("s"))
            .with_dimension("component", field("c"))
            .with_dimension("context", field("ctx"))
            .with_dimension("attributes", attributes)
            .with_run_dimensions(&self.target_resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LOG_TYPE_TAG;
    use serde_json::json;

    fn mapper() -> TelemetryMapper {
        TelemetryMapper::new("test-insights")
    }

    #[test]
    fn test_full_record() {
        let line = r#"{"t":{"$date":"2025-03-12T10:30:45.123+00:00"},"s":"W","c":"QUERY","ctx":"conn42","msg":"Slow query","attr":{"durationMillis":1500,"ns":"db.coll"}}"#;

        let event = mapper().map_record(line).unwrap();

        assert_eq!(event.message, "Slow query");
        assert_eq!(event.severity, SeverityLevel::Warning);
        assert_eq!(event.dimensions["mongodb_timestamp"], "2025-03-12T10:30:45.123+00:00");
        assert_eq!(event.dimensions["severity"], "W");
        assert_eq!(event.dimensions["component"], "QUERY");
        assert_eq!(event.dimensions["context"], "conn42");
        assert_eq!(event.dimensions["attributes"], json!({"durationMillis": 1500, "ns": "db.coll"}));
        assert_eq!(event.dimensions["source"], SOURCE_TAG);
        assert_eq!(event.dimensions["log_type"], LOG_TYPE_TAG);
        assert_eq!(event.dimensions["target_resource"], "test-insights");
    }

    #[test]
    fn test_fatal_record() {
        let event = mapper().map_record(r#"{"msg":"disk full","s":"F"}"#).unwrap();

        assert_eq!(event.message, "disk full");
        assert_eq!(event.severity, SeverityLevel::Error);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let event = mapper().map_record("{}").unwrap();

        assert_eq!(event.message, "MongoDB Data Federation Log");
        assert_eq!(event.severity, SeverityLevel::Information);
        assert_eq!(event.dimensions["mongodb_timestamp"], Value::Null);
        assert_eq!(event.dimensions["severity"], Value::Null);
        assert_eq!(event.dimensions["attributes"], json!({}));
        assert_eq!(event.dimensions.len(), 8);
    }

    #[test]
    fn test_severity_mapping_is_exact() {
        let cases = [
            (r#"{"s":"E"}"#, SeverityLevel::Error),
            (r#"{"s":"F"}"#, SeverityLevel::Error),
            (r#"{"s":"W"}"#, SeverityLevel::Warning),
            (r#"{"s":"w"}"#, SeverityLevel::Information),
            (r#"{"s":"I"}"#, SeverityLevel::Information),
            (r#"{"s":"D2"}"#, SeverityLevel::Information),
            (r#"{"s":3}"#, SeverityLevel::Information),
            (r#"{"s":null}"#, SeverityLevel::Information),
        ];

        for (line, expected) in cases {
            assert_eq!(mapper().map_record(line).unwrap().severity, expected, "{}", line);
        }
    }

    #[test]
    fn test_malformed_line() {
        let err = mapper().map_record("{not json").unwrap_err();
        assert!(!err.message.is_empty());
        assert_eq!(err.line_excerpt, "{not json");
    }

    #[test]
    fn test_non_object_json_is_rejected() {
        assert!(mapper().map_record("[1,2,3]").is_err());
        assert!(mapper().map_record("\"just a string\"").is_err());
    }

    #[test]
    fn test_excerpt_is_truncated() {
        let line = format!("{{{}", "é".repeat(2_000));
        let err = mapper().map_record(&line).unwrap_err();

        assert_eq!(err.line_excerpt.chars().count(), LINE_EXCERPT_CHARS);
    }
}
