//! Error types for the query log forwarder

use crate::mapper::ParseError;
use std::fmt;

pub type Result<T> = std::result::Result<T, ForwarderError>;

#[derive(Debug)]
pub enum ForwarderError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed before a response was received
    Http(reqwest::Error),

    /// Configuration error
    Config(String),

    /// Source API rejected the credentials (401) or the permission (403)
    Auth { status: u16, context: String },

    /// Source API has no data for the request (404)
    NotFound(String),

    /// Network failure, timeout or unexpected status
    Transport(String),

    /// Log line is not a JSON object
    Parse(ParseError),

    /// Telemetry backend refused or failed to receive an event
    Telemetry(String),

    /// Digest challenge could not be answered
    Digest(String),
}

impl ForwarderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ForwarderError::NotFound(_))
    }

    /// Short, stable name of the error kind for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ForwarderError::Io(_) => "io",
            ForwarderError::Http(_) | ForwarderError::Transport(_) => "transport",
            ForwarderError::Config(_) => "config",
            ForwarderError::Auth { .. } => "auth",
            ForwarderError::NotFound(_) => "not_found",
            ForwarderError::Parse(_) => "parse",
            ForwarderError::Telemetry(_) => "telemetry",
            ForwarderError::Digest(_) => "digest",
        }
    }
}

impl fmt::Display for ForwarderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwarderError::Io(err) => write!(f, "IO error: {}", err),
            ForwarderError::Http(err) => write!(f, "HTTP error: {}", err),
            ForwarderError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ForwarderError::Auth { status, context } => {
                write!(f, "Authorization failed ({}): {}", status, context)
            }
            ForwarderError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ForwarderError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ForwarderError::Parse(err) => write!(f, "Log parsing error: {}", err),
            ForwarderError::Telemetry(msg) => write!(f, "Telemetry error: {}", msg),
            ForwarderError::Digest(msg) => write!(f, "Digest authentication error: {}", msg),
        }
    }
}

impl std::error::Error for ForwarderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForwarderError::Io(err) => Some(err),
            ForwarderError::Http(err) => Some(err),
            ForwarderError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ForwarderError {
    fn from(err: std::io::Error) -> Self {
        ForwarderError::Io(err)
    }
}

impl From<reqwest::Error> for ForwarderError {
    fn from(err: reqwest::Error) -> Self {
        ForwarderError::Http(err)
    }
}

impl From<ParseError> for ForwarderError {
    fn from(err: ParseError) -> Self {
        ForwarderError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguished_from_transport() {
        let missing = ForwarderError::NotFound("queryLogs.gz".to_string());
        let broken = ForwarderError::Transport("connection reset".to_string());

        assert!(missing.is_not_found());
        assert!(!broken.is_not_found());
        assert_eq!(missing.kind(), "not_found");
        assert_eq!(broken.kind(), "transport");
    }

    #[test]
    fn test_auth_display() {
        let err = ForwarderError::Auth {
            status: 403,
            context: "listing Data Federation instances".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Authorization failed (403): listing Data Federation instances"
        );
    }

    #[test]
    fn test_parse_error_keeps_source() {
        use std::error::Error;

        let err = ForwarderError::from(ParseError {
            message: "expected value at line 1 column 1".to_string(),
            line_excerpt: "{broken".to_string(),
        });

        assert_eq!(err.kind(), "parse");
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("Log parsing error: "));
    }
}
