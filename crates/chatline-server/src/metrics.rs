//! Metrics collection and export for Chatline.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use chatline_core::HubStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chatline_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chatline_connections_active";
    pub const CONNECTIONS_REFUSED: &str = "chatline_connections_refused_total";
    pub const EVENTS_TOTAL: &str = "chatline_events_total";
    pub const DELIVERIES_TOTAL: &str = "chatline_deliveries_total";
    pub const USERS_ONLINE: &str = "chatline_users_online";
    pub const ROOMS_ACTIVE: &str = "chatline_rooms_active";
    pub const CALLS_ACTIVE: &str = "chatline_calls_active";
    pub const LATENCY_SECONDS: &str = "chatline_dispatch_latency_seconds";
    pub const ERRORS_TOTAL: &str = "chatline_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REFUSED,
        "Upgrades refused because the server was full"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound client events by name");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Outbound events queued to connections");
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with a live session");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one subscriber");
    metrics::describe_gauge!(names::CALLS_ACTIVE, "Calls in progress");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Time to process one command in the dispatcher"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

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

/// Record an upgrade refused at capacity.
pub fn record_refused() {
    counter!(names::CONNECTIONS_REFUSED).increment(1);
}

/// Record an inbound client event.
pub fn record_event(name: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => name).increment(1);
}

/// Record queued deliveries.
pub fn record_deliveries(count: usize) {
    counter!(names::DELIVERIES_TOTAL).increment(count as u64);
}

/// Record dispatcher latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Update hub gauges.
pub fn set_hub_stats(stats: &HubStats) {
    gauge!(names::USERS_ONLINE).set(stats.online_users as f64);
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::CALLS_ACTIVE).set(stats.active_calls as f64);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        // No recorder installed: every call is a no-op
        let _guard = ConnectionMetricsGuard::new();
        record_event("chat:join");
        record_deliveries(3);
        set_hub_stats(&HubStats::default());
        record_error("decode");
    }
}
