//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle whose recorder is not installed globally (tests, embedding).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// WebSocket connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Commands handled total (counter, labels: command).
pub const RELAY_COMMANDS_TOTAL: &str = "relay_commands_total";
/// Error replies sent total (counter, labels: code).
pub const RELAY_PROTOCOL_ERRORS_TOTAL: &str = "relay_protocol_errors_total";
/// Envelopes written to a connection total (counter).
pub const RELAY_ENVELOPES_DELIVERED_TOTAL: &str = "relay_envelopes_delivered_total";
/// Envelopes dropped by the delivery worker total (counter).
pub const RELAY_DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Envelopes buffered in the offline mailbox (gauge).
pub const RELAY_MAILBOX_BUFFERED: &str = "relay_mailbox_buffered";
/// Mailbox envelopes discarded past the retention window (counter).
pub const RELAY_MAILBOX_EXPIRED_TOTAL: &str = "relay_mailbox_expired_total";
/// Login attempts total (counter, labels: outcome).
pub const RELAY_LOGINS_TOTAL: &str = "relay_logins_total";
/// Connections closed because the same identity logged in again (counter).
pub const RELAY_SESSIONS_SUPERSEDED_TOTAL: &str = "relay_sessions_superseded_total";
