//! Client metrics
//!
//! OpenTelemetry instruments recorded by the client when metrics are enabled
//! through [`ClientBuilder::with_metrics`](crate::ClientBuilder::with_metrics).
//! They export through whatever meter provider is installed globally,
//! normally the one set up by `tether_core::init_observability`.
//!
//! # Metrics Collected
//!
//! - **connection.state**: current state (gauge, see `ConnectionState::as_metric`)
//! - **requests.total** / **request.duration**: by method and status
//! - **requests.pending**: in-flight requests (gauge)
//! - **errors.total**: by error kind
//! - **reconnection.attempts** / **reconnection.success**
//! - **heartbeat.failures**
//! - **notifications.received**: by method

use crate::ConnectionState;
use std::sync::atomic::{AtomicU64, Ordering};
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Instruments for one client
pub struct ClientMetrics {
    connection_state: Gauge<i64>,
    requests_total: Counter<u64>,
    request_duration: Histogram<f64>,
    requests_pending: Gauge<u64>,
    errors_total: Counter<u64>,
    reconnection_attempts: Counter<u64>,
    reconnection_success: Counter<u64>,
    heartbeat_failures: Counter<u64>,
    notifications_received: Counter<u64>,
    pending: AtomicU64,
}

impl ClientMetrics {
    /// Instruments on the global meter named `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let meter = global::meter_with_scope(
            opentelemetry::InstrumentationScope::builder(service_name.into()).build(),
        );
        Self::new_with_meter(&meter)
    }

    /// Instruments on a caller-supplied meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("tether.client.connection.state")
                .with_description("Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=error)")
                .build(),
            requests_total: meter
                .u64_counter("tether.client.requests.total")
                .with_description("Requests completed, by method and status")
                .build(),
            request_duration: meter
                .f64_histogram("tether.client.request.duration")
                .with_description("Request round-trip time in seconds")
                .with_unit("s")
                .build(),
            requests_pending: meter
                .u64_gauge("tether.client.requests.pending")
                .with_description("Requests awaiting a response")
                .build(),
            errors_total: meter
                .u64_counter("tether.client.errors.total")
                .with_description("Errors, by kind")
                .build(),
            reconnection_attempts: meter
                .u64_counter("tether.client.reconnection.attempts")
                .with_description("Reconnection attempts scheduled")
                .build(),
            reconnection_success: meter
                .u64_counter("tether.client.reconnection.success")
                .with_description("Reconnections that succeeded")
                .build(),
            heartbeat_failures: meter
                .u64_counter("tether.client.heartbeat.failures")
                .with_description("Liveness probes that failed")
                .build(),
            notifications_received: meter
                .u64_counter("tether.client.notifications.received")
                .with_description("Notifications received, by method")
                .build(),
            pending: AtomicU64::new(0),
        }
    }

    /// Record the state just entered
    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_metric(), &[]);
    }

    /// Count a finished request and its round-trip time; `status` is
    /// `success` or `error`
    pub fn record_request(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Report the number of requests awaiting a response
    pub fn update_pending(&self, pending: usize) {
        let pending = u64::try_from(pending).unwrap_or(u64::MAX);
        self.pending.store(pending, Ordering::Relaxed);
        self.requests_pending.record(pending, &[]);
    }

    /// Last value reported on the pending gauge
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Count an error by its kind label
    pub fn record_error(&self, kind: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_kind", kind.to_string())]);
    }

    /// Count a scheduled reconnection attempt
    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    /// Count a reconnection that reached `Connected`
    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    /// Count a failed liveness probe
    pub fn record_heartbeat_failure(&self) {
        self.heartbeat_failures.add(1, &[]);
    }

    /// Count a notification by method
    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_provider() {
        let metrics = ClientMetrics::new("test-client");

        metrics.update_connection_state(ConnectionState::Connecting);
        metrics.update_connection_state(ConnectionState::Connected);
        metrics.record_request("system.ping", "success", 0.05);
        metrics.record_request("chat.completion", "error", 1.2);
        metrics.update_pending(2);
        metrics.record_error("request_timeout");
        metrics.record_reconnection_attempt();
        metrics.record_reconnection_success();
        metrics.record_heartbeat_failure();
        metrics.record_notification("system.health");
    }

    #[test]
    fn test_pending_tracks_last_report() {
        let metrics = ClientMetrics::new("test-client");
        assert_eq!(metrics.pending(), 0);

        metrics.update_pending(3);
        assert_eq!(metrics.pending(), 3);
        metrics.update_pending(0);
        assert_eq!(metrics.pending(), 0);
    }
}
