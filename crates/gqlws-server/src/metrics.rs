//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "gqlws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "gqlws_connections_active";
/// Connections refused because the server was full (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "gqlws_connections_rejected_total";
/// Operations started total (counter).
pub const OPERATIONS_STARTED_TOTAL: &str = "gqlws_operations_started_total";
/// Active streaming operations (gauge).
pub const OPERATIONS_ACTIVE: &str = "gqlws_operations_active";
/// Inbound frames total (counter).
pub const FRAMES_RECEIVED_TOTAL: &str = "gqlws_frames_received_total";
/// Outbound frames total (counter).
pub const FRAMES_SENT_TOTAL: &str = "gqlws_frames_sent_total";
/// Client messages rejected (counter, labels: kind).
pub const PROTOCOL_ERRORS_TOTAL: &str = "gqlws_protocol_errors_total";
/// Execution call duration seconds (histogram, labels: kind).
pub const EXEC_DURATION_SECONDS: &str = "gqlws_exec_duration_seconds";
