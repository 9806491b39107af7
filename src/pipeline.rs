//! Forwarding run: validate telemetry, resolve the source, download, forward, summarize

use crate::atlas::AtlasClient;
use crate::config::Config;
use crate::decoder::LogDecoder;
use crate::emitter::ThrottledEmitter;
use crate::errors::{ForwarderError, Result};
use crate::mapper::TelemetryMapper;
use crate::telemetry::{SOURCE_TAG, TelemetryEvent, TelemetrySink};

use std::fmt;
use std::path::Path;
use tracing::{error, info, instrument, warn};

/// Stages of a run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidateTelemetry,
    ResolveSource,
    Download,
    DecodeAndForward,
    Summarize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ValidateTelemetry => "validate-telemetry",
            Stage::ResolveSource => "resolve-source",
            Stage::Download => "download",
            Stage::DecodeAndForward => "decode-and-forward",
            Stage::Summarize => "summarize",
        };
        f.write_str(name)
    }
}

/// Counters from one decode-and-forward pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardStats {
    /// Lines parsed into events
    pub processed: u64,
    /// Lines that were not JSON objects
    pub parse_errors: u64,
    /// Events the backend did not accept
    pub emit_failures: u64,
    /// Long batch pauses taken
    pub batch_pauses: u64,
    /// Reading the artifact stopped early
    pub decode_failed: bool,
}

impl ForwardStats {
    /// Non-blank lines read from the artifact
    pub fn lines_read(&self) -> u64 {
        self.processed + self.parse_errors
    }

    /// Events the backend accepted
    pub fn forwarded(&self) -> u64 {
        self.processed.saturating_sub(self.emit_failures)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The telemetry backend did not accept the connection test
    TelemetryUnavailable,
    /// The source API rejected access, or the source is not listed when required
    SourceUnavailable,
    /// No artifact was downloaded; nothing was decoded
    NoArtifact,
    Forwarded(ForwardStats),
}

impl RunOutcome {
    /// The stage a run stopped at
    pub fn final_stage(&self) -> Stage {
        match self {
            RunOutcome::TelemetryUnavailable => Stage::ValidateTelemetry,
            RunOutcome::SourceUnavailable => Stage::ResolveSource,
            RunOutcome::NoArtifact => Stage::Download,
            RunOutcome::Forwarded(_) => Stage::Summarize,
        }
    }
}

/// Sequential query log forwarder
pub struct Forwarder<'a> {
    config: Config,
    atlas: AtlasClient,
    mapper: TelemetryMapper,
    sink: &'a dyn TelemetrySink,
}

impl<'a> Forwarder<'a> {
    pub fn new(config: Config, sink: &'a dyn TelemetrySink) -> Result<Self> {
        let atlas = AtlasClient::new(&config)?;
        let mapper = TelemetryMapper::new(config.target_resource.clone());

        Ok(Self {
            config,
            atlas,
            mapper,
            sink,
        })
    }

    pub fn atlas(&self) -> &AtlasClient {
        &self.atlas
    }

    #[instrument(skip(self), fields(source = %self.config.source_name))]
    pub async fn run(&self) -> RunOutcome {
        info!(stage = %Stage::ValidateTelemetry, "Starting Data Federation log forwarding");
        if !self.validate_telemetry().await {
            error!("Application Insights validation failed. Please check your connection string.");
            return RunOutcome::TelemetryUnavailable;
        }

        info!(stage = %Stage::ResolveSource, "Resolving log source");
        let Some(source_name) = self.resolve_source().await else {
            return RunOutcome::SourceUnavailable;
        };

        info!(stage = %Stage::Download, "Attempting to download logs for: {}", source_name);
        let Some(artifact) = self.atlas.download_query_logs(source_name).await else {
            error!("No Data Federation logs downloaded.");
            return RunOutcome::NoArtifact;
        };

        info!(stage = %Stage::DecodeAndForward, "Forwarding {}", artifact.path.display());
        let stats = self.forward_artifact(&artifact.path).await;

        self.summarize(&stats);
        RunOutcome::Forwarded(stats)
    }

    /// Send one test event; the backend must accept it before any source API call
    pub async fn validate_telemetry(&self) -> bool {
        info!("=== Azure Application Insights Configuration (Data Federation) ===");
        info!("Target Resource: {}", self.config.target_resource);

        let test_event = TelemetryEvent::connection_test(&self.config.target_resource);
        match self.sink.send(&test_event).await {
            Ok(()) => {
                info!("Test event accepted by Application Insights");
                true
            }
            Err(e) => {
                error!(
                    error_kind = e.kind(),
                    "Failed to validate Application Insights connection: {}", e
                );
                false
            }
        }
    }

    /// Confirm API access and pick the source to download.
    ///
    /// The listing only gates the download when `require_listed_source` is set.
    pub async fn resolve_source(&self) -> Option<&str> {
        if !self.atlas.check_access().await {
            return None;
        }

        let wanted = self.config.source_name.as_str();
        let sources = self.atlas.list_log_sources().await;
        let listed = sources.iter().any(|source| source.name == wanted);

        if !listed {
            if self.config.require_listed_source {
                error!("Data Federation instance {} is not listed in the project", wanted);
                return None;
            }
            warn!(
                "Data Federation instance {} not found in listing, attempting download anyway",
                wanted
            );
        }

        Some(wanted)
    }

    /// Decode the artifact and emit one event per parsed line
    pub async fn forward_artifact(&self, path: &Path) -> ForwardStats {
        let mut stats = ForwardStats::default();
        let mut emitter = ThrottledEmitter::new(self.sink, self.config.throttle.clone());

        match LogDecoder::open(path).await {
            Ok(mut decoder) => {
                while let Some(line) = decoder.next_line().await {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            error!("Failed to read gzipped log file {}: {}", path.display(), e);
                            stats.decode_failed = true;
                            break;
                        }
                    };

                    match self.mapper.map_record(&line) {
                        Ok(event) => {
                            emitter.emit(&event).await;
                            stats.processed += 1;
                        }
                        Err(e) => {
                            stats.parse_errors += 1;
                            let line = e.line_excerpt.clone();
                            let e = ForwarderError::from(e);
                            error!(
                                error_kind = e.kind(),
                                error = %e,
                                line = %line,
                                "Failed to parse MongoDBDF log line"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                let e = ForwarderError::from(e);
                error!(
                    error_kind = e.kind(),
                    "Failed to open gzipped log file {}: {}",
                    path.display(),
                    e
                );
                stats.decode_failed = true;
            }
        }

        let emitted = emitter.stats();
        stats.emit_failures = emitted.failed;
        stats.batch_pauses = emitted.batch_pauses;

        info!(
            "Log processing completed. Processed: {}, Errors: {}",
            stats.processed,
            stats.parse_errors + stats.emit_failures
        );
        emitter.drain().await;

        stats
    }

    fn summarize(&self, stats: &ForwardStats) {
        info!(stage = %Stage::Summarize, "=== Data Federation Log Forwarding Summary ===");
        info!(
            "Lines read: {}, forwarded: {}, parse errors: {}, emit failures: {}, batch pauses: {}",
            stats.lines_read(),
            stats.forwarded(),
            stats.parse_errors,
            stats.emit_failures,
            stats.batch_pauses
        );
        if stats.decode_failed {
            warn!("Reading the artifact stopped early; later entries were not forwarded");
        }
        info!("Target Resource: {}", self.config.target_resource);
        info!("Use this query in Application Insights:");
        info!(
            "traces | where customDimensions.source == \"{}\" | order by timestamp desc",
            SOURCE_TAG
        );
    }
}
