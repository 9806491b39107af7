//! Data Federation Query Log Forwarder Binary

use atlas_log_forwarder::{AppInsightsSink, Config, Forwarder, Result, RunOutcome};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be populated
    dotenv::dotenv().ok();

    initialize_tracing();

    info!("Starting Data Federation log forwarder v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Forwarder configuration - Project: {}, Instance: {}, Output: {}, Target resource: {}",
        config.credentials.group_id,
        config.source_name,
        config.output_dir.display(),
        config.target_resource
    );

    let sink = AppInsightsSink::new(&config.connection_string, config.metadata_timeout)?;
    info!("Application Insights ingestion endpoint: {}", sink.endpoint());

    let forwarder = Forwarder::new(config, &sink)?;

    match forwarder.run().await {
        RunOutcome::Forwarded(stats) => info!(
            "All Data Federation logs have been forwarded ({} of {} lines)",
            stats.forwarded(),
            stats.lines_read()
        ),
        outcome => info!("Run ended at stage {} with nothing forwarded", outcome.final_stage()),
    }

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
