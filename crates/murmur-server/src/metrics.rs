//! Metrics collection and export for murmur.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use murmur_core::RegistryStats;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "murmur_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "murmur_connections_active";
    pub const EVENTS_TOTAL: &str = "murmur_events_total";
    pub const DELIVERIES_TOTAL: &str = "murmur_deliveries_total";
    pub const PRUNED_TOTAL: &str = "murmur_pruned_connections_total";
    pub const PRESENCE_TRANSITIONS_TOTAL: &str = "murmur_presence_transitions_total";
    pub const HANDLER_SECONDS: &str = "murmur_handler_seconds";
    pub const ERRORS_TOTAL: &str = "murmur_errors_total";
    pub const ROOMS_ACTIVE: &str = "murmur_rooms_active";
    pub const USERS_ONLINE: &str = "murmur_users_online";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound client events by name");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Outbound frames queued for connections"
    );
    metrics::describe_counter!(
        names::PRUNED_TOTAL,
        "Connections pruned after a failed send"
    );
    metrics::describe_counter!(
        names::PRESENCE_TRANSITIONS_TOTAL,
        "Confirmed presence transitions by status"
    );
    metrics::describe_histogram!(names::HANDLER_SECONDS, "Event handler latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors reported to clients by code");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of non-empty rooms");
    metrics::describe_gauge!(names::USERS_ONLINE, "Users with at least one chat connection");

    info!("Metrics described");
}

/// Start the Prometheus metrics server and describe every metric.
///
/// Descriptions are registered after the recorder is installed; before that
/// they would go to the no-op recorder.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection(kind: &'static str) {
    counter!(names::CONNECTIONS_TOTAL, "kind" => kind).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "kind" => kind).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection(kind: &'static str) {
    gauge!(names::CONNECTIONS_ACTIVE, "kind" => kind).decrement(1.0);
}

/// Record an inbound event.
pub fn record_event(event: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
}

/// Record outbound deliveries.
pub fn record_deliveries(count: usize) {
    counter!(names::DELIVERIES_TOTAL).increment(count as u64);
}

/// Record handler latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::HANDLER_SECONDS).record(seconds);
}

/// Record a confirmed presence transition.
pub fn record_presence(status: &'static str) {
    counter!(names::PRESENCE_TRANSITIONS_TOTAL, "status" => status).increment(1);
}

/// Record an error reported to a client.
pub fn record_error(code: &'static str) {
    counter!(names::ERRORS_TOTAL, "code" => code).increment(1);
}

/// Publish registry gauges and the pruned-connection total.
pub fn record_registry(stats: &RegistryStats, pruned_total: u64) {
    gauge!(names::ROOMS_ACTIVE).set(stats.rooms as f64);
    gauge!(names::USERS_ONLINE).set(stats.online_users as f64);
    counter!(names::PRUNED_TOTAL).absolute(pruned_total);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard {
    kind: &'static str,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection of `kind`.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        record_connection(kind);
        Self { kind }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection(self.kind);
    }
}
