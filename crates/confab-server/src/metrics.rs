//! Metrics collection and export for Confab.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "confab_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "confab_connections_active";
    pub const USERS_ONLINE: &str = "confab_users_online";
    pub const RELAY_DELIVERED_TOTAL: &str = "confab_relay_delivered_total";
    pub const RELAY_DROPPED_TOTAL: &str = "confab_relay_dropped_total";
    pub const MESSAGES_BYTES: &str = "confab_messages_bytes";
    pub const HISTORY_APPENDS_TOTAL: &str = "confab_history_appends_total";
    pub const LATENCY_SECONDS: &str = "confab_latency_seconds";
    pub const ERRORS_TOTAL: &str = "confab_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Current number of identified users");
    metrics::describe_counter!(
        names::RELAY_DELIVERED_TOTAL,
        "Total payloads handed to a recipient connection"
    );
    metrics::describe_counter!(
        names::RELAY_DROPPED_TOTAL,
        "Total payloads dropped because the recipient was offline"
    );
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of payloads processed");
    metrics::describe_counter!(
        names::HISTORY_APPENDS_TOTAL,
        "Total messages written to the history store"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a relay attempt and its payload size.
pub fn record_relay(delivered: bool, bytes: usize) {
    if delivered {
        counter!(names::RELAY_DELIVERED_TOTAL).increment(1);
    } else {
        counter!(names::RELAY_DROPPED_TOTAL).increment(1);
    }
    counter!(names::MESSAGES_BYTES).increment(bytes as u64);
}

/// Record a history append.
pub fn record_history_append() {
    counter!(names::HISTORY_APPENDS_TOTAL).increment(1);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update the online user gauge.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
