use std::net::SocketAddr;

use tracing::{info, warn};

/// Install the Prometheus exporter on the given port. Failure is logged, not fatal.
pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            info!("Prometheus exporter listening on http://{}/metrics", addr);
        }
        Err(e) => {
            warn!("Prometheus exporter install failed (possibly already installed): {}", e);
        }
    }
}

pub fn run_started() {
    ::metrics::counter!("epi_pipeline_runs_total").increment(1);
}

pub fn run_failed(stage: &str) {
    ::metrics::counter!("epi_pipeline_failures_total", "stage" => stage.to_string()).increment(1);
}

pub fn node_materialized(node: &str, rows: usize, secs: f64) {
    ::metrics::histogram!("epi_node_duration_seconds", "node" => node.to_string()).record(secs);
    ::metrics::gauge!("epi_rows_materialized", "node" => node.to_string()).set(rows as f64);
}

pub fn gate_failed(gate: &str, policy: &str) {
    ::metrics::counter!(
        "epi_gate_failures_total",
        "gate" => gate.to_string(),
        "policy" => policy.to_string()
    )
    .increment(1);
}
