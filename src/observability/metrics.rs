//! Metrics collection and exposition.
//!
//! # Metrics
//! - `webhook_admission_requests_total` (counter): `/mutate` calls by outcome
//! - `webhook_admission_duration_seconds` (histogram): `/mutate` latency
//! - `webhook_certificate_reloads_total` (counter): reload attempts by result
//! - `webhook_certificate_generation` (gauge): generation of the active pair
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing unless they call [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one `/mutate` call.
pub fn record_admission(outcome: &'static str, start: Instant) {
    counter!("webhook_admission_requests_total", "outcome" => outcome).increment(1);
    histogram!("webhook_admission_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a reload attempt triggered by the file watcher.
pub fn record_certificate_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("webhook_certificate_reloads_total", "result" => result).increment(1);
}

pub fn record_certificate_generation(generation: u64) {
    gauge!("webhook_certificate_generation").set(generation as f64);
}
