//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_policy_invocations_total` (counter): policy calls by direction, phase
//! - `gateway_policy_failures_total` (counter): failures delivered, by direction, type
//! - `gateway_chain_errors_total` (counter): unrecoverable errors by direction, kind
//! - `gateway_exchanges_total` (counter): finished exchanges by outcome, status
//! - `gateway_exchange_duration_seconds` (histogram): end-to-end latency
//!
//! Recording is a no-op until a recorder is installed, so the library can be
//! used without the Prometheus exporter.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::policy::PolicyFailureType;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_policy_invocation(direction: &'static str, phase: &'static str) {
    counter!(
        "gateway_policy_invocations_total",
        "direction" => direction,
        "phase" => phase
    )
    .increment(1);
}

pub fn record_policy_failure(direction: &'static str, failure_type: PolicyFailureType) {
    counter!(
        "gateway_policy_failures_total",
        "direction" => direction,
        "type" => failure_type.as_str()
    )
    .increment(1);
}

pub fn record_chain_error(direction: &'static str, kind: &'static str) {
    counter!(
        "gateway_chain_errors_total",
        "direction" => direction,
        "kind" => kind
    )
    .increment(1);
}

pub fn record_exchange(outcome: &'static str, status: u16, start: Instant) {
    counter!(
        "gateway_exchanges_total",
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_exchange_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}
