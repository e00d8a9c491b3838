//! Metrics collection and exposition.
//!
//! # Metrics
//! - `depguard_dependency_health` (gauge): current health code per dependency
//! - `depguard_health_transitions_total` (counter): transitions by dependency and target state
//! - `depguard_connect_attempts_total` (counter): connect attempts by dependency and outcome
//! - `depguard_publish_total` (counter): publishes by queue and outcome
//! - `depguard_buffered_messages` (gauge): messages waiting for replay
//! - `depguard_buffer_dropped_total` (counter): buffered messages dropped by reason
//! - `depguard_deliveries_total` (counter): consumed messages by queue and ack/nack
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::Health;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_health_transition(dependency: &str, health: Health) {
    gauge!("depguard_dependency_health", "dependency" => dependency.to_string()).set(health.code());
    counter!(
        "depguard_health_transitions_total",
        "dependency" => dependency.to_string(),
        "health" => health.as_str()
    )
    .increment(1);
}

pub fn record_connect_attempt(dependency: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "depguard_connect_attempts_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_publish(queue: &str, outcome: &'static str) {
    counter!("depguard_publish_total", "queue" => queue.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_buffer_size(size: usize) {
    gauge!("depguard_buffered_messages").set(size as f64);
}

pub fn record_buffer_dropped(reason: &'static str, count: usize) {
    counter!("depguard_buffer_dropped_total", "reason" => reason).increment(count as u64);
}

pub fn record_delivery(queue: &str, acked: bool) {
    let outcome = if acked { "ack" } else { "nack" };
    counter!("depguard_deliveries_total", "queue" => queue.to_string(), "outcome" => outcome).increment(1);
}
