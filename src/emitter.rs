//! Rate-limited delivery of telemetry events

use crate::config::ThrottleConfig;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Counters for one emission sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    /// Events handed to the sink, successful or not
    pub emitted: u64,
    /// Events the sink failed to accept
    pub failed: u64,
    /// Long batch pauses taken
    pub batch_pauses: u64,
}

/// Sends events one at a time, pausing after each and after every batch
pub struct ThrottledEmitter<'a> {
    sink: &'a dyn TelemetrySink,
    throttle: ThrottleConfig,
    stats: EmitStats,
}

impl<'a> ThrottledEmitter<'a> {
    pub fn new(sink: &'a dyn TelemetrySink, throttle: ThrottleConfig) -> Self {
        Self {
            sink,
            throttle,
            stats: EmitStats::default(),
        }
    }

    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    /// Send one event. Failures are logged and counted, never returned.
    pub async fn emit(&mut self, event: &TelemetryEvent) {
        if let Err(e) = self.sink.send(event).await {
            self.stats.failed += 1;
            error!(
                error_kind = e.kind(),
                "Failed to emit {} event: {}", event.severity, e
            );
        }
        self.stats.emitted += 1;

        pause(self.throttle.log_delay).await;

        let batch_size = self.throttle.batch_size.max(1) as u64;
        if self.stats.emitted % batch_size == 0 {
            self.stats.batch_pauses += 1;
            info!(
                "Processed batch {} ({} total entries). Pausing to prevent queue overflow...",
                self.stats.batch_pauses, self.stats.emitted
            );
            pause(self.throttle.batch_delay).await;
        }
    }

    /// Give the backend time to flush what it buffered
    pub async fn drain(&self) {
        info!(
            "Waiting {:.1}s for final telemetry to be sent...",
            self.throttle.drain_wait.as_secs_f64()
        );
        pause(self.throttle.drain_wait).await;
    }
}

async fn pause(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    debug!("Pausing for {}ms", duration.as_millis());
    sleep(duration).await;
}
