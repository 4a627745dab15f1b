//! Pipeline metrics.
//!
//! # Metrics
//! - `ledger_requests_rejected_total` (counter): gate rejections by `reason`
//! - `ledger_rate_limited_total` (counter): 429s by `route_class`
//! - `ledger_inputs_sanitized_total` (counter): rewrites by `field`
//! - `ledger_errors_total` (counter): normalized errors by `status`
//!
//! # Design Decisions
//! - Counters are recorded through the `metrics` facade; without an
//!   installed recorder they are no-ops
//! - The Prometheus exporter runs on its own listener

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn record_rejected(reason: &str) {
    counter!("ledger_requests_rejected_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_rate_limited(route_class: &str) {
    counter!("ledger_rate_limited_total", "route_class" => route_class.to_string()).increment(1);
}

pub fn record_sanitized(field: &str) {
    counter!("ledger_inputs_sanitized_total", "field" => field.to_string()).increment(1);
}

pub fn record_error(status: u16) {
    counter!("ledger_errors_total", "status" => status.to_string()).increment(1);
}

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}
