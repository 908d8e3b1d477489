//! Logging setup for the Murmur server.
//!
//! Structured JSON lines by default; `--pretty` switches to the
//! human-readable multi-line format for local development. Metrics from
//! `murmur-core` go through the global OpenTelemetry meter and are no-ops
//! until a provider is installed.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,murmur_server=debug,murmur_core=debug";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize JSON logging.
///
/// # Configuration
///
/// - `RUST_LOG`: Log filter (default: `info,murmur_server=debug,murmur_core=debug`)
pub fn init() -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Telemetry initialized");
    Ok(())
}

/// Initialize pretty console logging for local development.
pub fn init_local() -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(filter())
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("Local telemetry initialized");
    Ok(())
}

pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
