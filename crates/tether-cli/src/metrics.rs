//! Prometheus export of the client metrics.

use crate::config::MetricsConfig;
use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Describe the client metrics and, if enabled, start the exporter.
///
/// # Errors
///
/// Returns an error if the listener address is invalid or the exporter
/// cannot be installed.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr = config.listen_addr()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start metrics exporter")?;
    tether_client::metrics::describe();

    info!(addr = %addr, "Metrics server listening");
    Ok(())
}
