//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by listen port, status
//! - `proxy_request_duration_seconds` (histogram): latency by listen port
//! - `proxy_binds_total` (counter): listen attempts by port, outcome
//! - `proxy_probe_failures_total` (counter): failed health probes by target
//! - `proxy_monitor_failing_targets` (gauge): targets currently in error

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(port: u16, status: u16, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "port" => port.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "port" => port.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_bind(port: u16, success: bool) {
    metrics::counter!(
        "proxy_binds_total",
        "port" => port.to_string(),
        "outcome" => if success { "bound" } else { "failed" }
    )
    .increment(1);
}

pub fn record_probe_failure(target: &str) {
    metrics::counter!("proxy_probe_failures_total", "target" => target.to_string()).increment(1);
}

pub fn record_failing_targets(count: usize) {
    metrics::gauge!("proxy_monitor_failing_targets").set(count as f64);
}
