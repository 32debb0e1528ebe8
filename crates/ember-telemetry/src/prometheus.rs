//! Prometheus recorder installation.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render the text exposition format.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render the Prometheus text format from an installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}
