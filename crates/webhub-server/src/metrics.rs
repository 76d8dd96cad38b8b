//! Metrics collection and export for WebHub.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use webhub_core::ChannelKind;

/// Metric names.
pub mod names {
    pub const THINGS_EXPOSED: &str = "webhub_things_exposed";
    pub const CHANNELS_ACTIVE: &str = "webhub_channels_active";
    pub const CHANNELS_TOTAL: &str = "webhub_channels_total";
    pub const WS_MESSAGES_TOTAL: &str = "webhub_websocket_messages_total";
    pub const ACTION_SECONDS: &str = "webhub_action_seconds";
    pub const ERRORS_TOTAL: &str = "webhub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(names::THINGS_EXPOSED, "Current number of exposed things");
    metrics::describe_gauge!(
        names::CHANNELS_ACTIVE,
        "Current number of attached delivery channels"
    );
    metrics::describe_counter!(
        names::CHANNELS_TOTAL,
        "Total number of delivery channels since server start"
    );
    metrics::describe_counter!(
        names::WS_MESSAGES_TOTAL,
        "Total number of WebSocket messages processed"
    );
    metrics::describe_histogram!(names::ACTION_SECONDS, "Action invocation latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of error responses");

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

/// Update the exposed thing count.
pub fn set_things_exposed(count: usize) {
    gauge!(names::THINGS_EXPOSED).set(count as f64);
}

/// Record a WebSocket message.
pub fn record_ws_message(direction: &'static str) {
    counter!(names::WS_MESSAGES_TOTAL, "direction" => direction).increment(1);
}

/// Record action latency.
pub fn record_action(seconds: f64) {
    histogram!(names::ACTION_SECONDS).record(seconds);
}

/// Record an error response.
pub fn record_error(status: u16) {
    counter!(names::ERRORS_TOTAL, "status" => status.to_string()).increment(1);
}

/// Metrics guard that counts an attached channel until dropped.
pub struct ChannelMetricsGuard {
    kind: ChannelKind,
}

impl ChannelMetricsGuard {
    /// Create a new metrics guard, recording an attached channel.
    #[must_use]
    pub fn new(kind: ChannelKind) -> Self {
        counter!(names::CHANNELS_TOTAL, "kind" => kind.as_str()).increment(1);
        gauge!(names::CHANNELS_ACTIVE, "kind" => kind.as_str()).increment(1.0);
        Self { kind }
    }
}

impl Drop for ChannelMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CHANNELS_ACTIVE, "kind" => self.kind.as_str()).decrement(1.0);
    }
}
