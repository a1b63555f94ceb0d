//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, route, status
//! - `gateway_request_duration_seconds` (histogram): latency by method, route
//! - `gateway_connections_total` (counter): classified connections by protocol
//! - `gateway_connections_dropped_total` (counter): unclassified connections by reason
//! - `gateway_ready` (gauge): 1 while ready, 0 otherwise
//! - `gateway_log_shipping_failures_total` (counter): failed log batches
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Route labels are matched route templates, never raw paths

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::kernel::{HookError, TelemetryAgent};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] metrics_exporter_prometheus::BuildError),

    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Prometheus exporter serving `/metrics` on its own address.
///
/// Installed as the global recorder; stopping it aborts the HTTP listener.
pub struct MetricsAgent {
    address: SocketAddr,
    exporter: JoinHandle<()>,
}

impl MetricsAgent {
    /// Install the global recorder and start the scrape endpoint.
    pub fn install(address: SocketAddr) -> Result<Self, TelemetryError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(address)
            .build()?;

        metrics::set_global_recorder(recorder).map_err(|_| TelemetryError::AlreadyInstalled)?;

        let exporter = tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });

        tracing::info!(address = %address, "Metrics exporter listening");
        Ok(Self { address, exporter })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

#[async_trait]
impl TelemetryAgent for MetricsAgent {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn stop(&self) -> Result<(), HookError> {
        self.exporter.abort();
        tracing::debug!(address = %self.address, "Metrics exporter stopped");
        Ok(())
    }
}

/// Record one completed request.
pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record a connection the demultiplexer handed to a protocol handler.
pub fn record_connection(protocol: &'static str) {
    metrics::counter!("gateway_connections_total", "protocol" => protocol).increment(1);
}

/// Record a connection the demultiplexer closed without classifying it.
pub fn record_dropped_connection(reason: &'static str) {
    metrics::counter!("gateway_connections_dropped_total", "reason" => reason).increment(1);
}

pub fn record_shipping_failure(lines: usize) {
    metrics::counter!("gateway_log_shipping_failures_total").increment(1);
    metrics::counter!("gateway_log_lines_dropped_total").increment(lines as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_request("GET", "/healthz", 200, Instant::now());
        record_connection("http1");
        record_dropped_connection("timeout");
        record_shipping_failure(3);
    }
}
