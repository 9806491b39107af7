//! Configuration management for the query log forwarder

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v2";
pub const DEFAULT_API_VERSION: &str = "2025-03-12";
pub const DEFAULT_SOURCE_NAME: &str = "FederatedDatabaseInstance0";
pub const DEFAULT_TARGET_RESOURCE: &str = "Not specified";

/// Atlas programmatic API key pair and the project it is scoped to
#[derive(Clone, Default)]
pub struct SourceCredentials {
    pub public_key: String,
    pub private_key: String,
    pub group_id: String,
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("group_id", &self.group_id)
            .finish()
    }
}

/// Pacing applied while emitting events to the telemetry backend
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// Number of emissions between long pauses
    pub batch_size: usize,

    /// Long pause after every `batch_size` emissions
    pub batch_delay: Duration,

    /// Short pause after every emission
    pub log_delay: Duration,

    /// Wait after the last emission before returning
    pub drain_wait: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay: Duration::from_secs(2),
            log_delay: Duration::from_millis(10),
            drain_wait: Duration::from_secs(5),
        }
    }
}

impl ThrottleConfig {
    /// No pauses at all; batch boundaries are still counted
    pub fn unthrottled(batch_size: usize) -> Self {
        Self {
            batch_size,
            batch_delay: Duration::ZERO,
            log_delay: Duration::ZERO,
            drain_wait: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: SourceCredentials,

    /// Atlas Admin API base URL
    pub base_url: String,

    /// Versioned media type date sent in the Accept header
    pub api_version: String,

    /// Data Federation instance to pull query logs from
    pub source_name: String,

    /// Abort when the source is missing from the instance listing
    pub require_listed_source: bool,

    /// Directory the compressed artifact is written to
    pub output_dir: PathBuf,

    /// Application Insights connection string
    pub connection_string: String,

    /// Resource label attached to every event
    pub target_resource: String,

    pub throttle: ThrottleConfig,

    /// HTTP timeout for metadata requests
    pub metadata_timeout: Duration,

    /// HTTP timeout for the compressed log download
    pub download_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: SourceCredentials::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            require_listed_source: false,
            output_dir: PathBuf::from("mongodb_logs"),
            connection_string: String::new(),
            target_resource: DEFAULT_TARGET_RESOURCE.to_string(),
            throttle: ThrottleConfig::default(),
            metadata_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(public_key) = lookup("MONGODB_PUBLIC_KEY") {
            config.credentials.public_key = public_key;
        }

        if let Some(private_key) = lookup("MONGODB_PRIVATE_KEY") {
            config.credentials.private_key = private_key;
        }

        if let Some(group_id) = lookup("MONGODB_GROUP_ID") {
            config.credentials.group_id = group_id;
        }

        if let Some(base_url) = lookup("MONGODB_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Some(api_version) = lookup("MONGODB_API_VERSION") {
            config.api_version = api_version;
        }

        if let Some(source_name) = lookup("DATA_FEDERATION_NAME") {
            config.source_name = source_name;
        }

        if let Some(require) = lookup("REQUIRE_LISTED_SOURCE") {
            config.require_listed_source = require.to_lowercase() == "true";
        }

        if let Some(output_dir) = lookup("LOG_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(output_dir);
        }

        if let Some(connection_string) = lookup("AZURE_APPINSIGHTS_CONNECTION_STRING") {
            config.connection_string = connection_string;
        }

        if let Some(target_resource) = lookup("AZURE_TARGET_RESOURCE") {
            config.target_resource = target_resource;
        }

        if let Some(batch_size) = lookup("BATCH_SIZE") {
            if let Ok(size) = batch_size.parse() {
                config.throttle.batch_size = size;
            }
        }

        if let Some(delay) = lookup("BATCH_DELAY_SECONDS").and_then(|v| parse_seconds(&v)) {
            config.throttle.batch_delay = delay;
        }

        if let Some(delay) = lookup("LOG_DELAY_SECONDS").and_then(|v| parse_seconds(&v)) {
            config.throttle.log_delay = delay;
        }

        if let Some(wait) = lookup("TELEMETRY_WAIT_SECONDS").and_then(|v| parse_seconds(&v)) {
            config.throttle.drain_wait = wait;
        }

        if let Some(timeout) = lookup("METADATA_TIMEOUT_SECONDS").and_then(|v| parse_seconds(&v)) {
            config.metadata_timeout = timeout;
        }

        if let Some(timeout) = lookup("DOWNLOAD_TIMEOUT_SECONDS").and_then(|v| parse_seconds(&v)) {
            config.download_timeout = timeout;
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.credentials.public_key.is_empty() {
            return Err("MONGODB_PUBLIC_KEY cannot be empty".to_string());
        }

        if self.credentials.private_key.is_empty() {
            return Err("MONGODB_PRIVATE_KEY cannot be empty".to_string());
        }

        if self.credentials.group_id.is_empty() {
            return Err("MONGODB_GROUP_ID cannot be empty".to_string());
        }

        if self.source_name.is_empty() {
            return Err("DATA_FEDERATION_NAME cannot be empty".to_string());
        }

        if self.connection_string.is_empty() {
            return Err("AZURE_APPINSIGHTS_CONNECTION_STRING cannot be empty".to_string());
        }

        if self.throttle.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Parse a non-negative, finite number of seconds
fn parse_seconds(value: &str) -> Option<Duration> {
    let seconds = value.trim().parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}
