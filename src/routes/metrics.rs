use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;

/// Install the global recorder and return a handle for the `/metrics` route.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Install the global recorder with its own HTTP listener (worker processes).
pub fn install_listener(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("worker_jobs_received_total", "Jobs received from the queue");
    metrics::describe_counter!(
        "worker_jobs_completed_total",
        "Jobs that produced a prediction record"
    );
    metrics::describe_counter!(
        "worker_jobs_no_detections_total",
        "Jobs acknowledged without detections"
    );
    metrics::describe_counter!(
        "worker_jobs_failed_total",
        "Jobs left for redelivery, by error class"
    );
    metrics::describe_counter!(
        "worker_notify_failures_total",
        "Downstream notifications that failed"
    );
    metrics::describe_histogram!(
        "worker_job_processing_seconds",
        metrics::Unit::Seconds,
        "Time to run one job through the pipeline"
    );
}

/// GET /metrics: Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
