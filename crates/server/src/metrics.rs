//! Prometheus metrics bootstrap
//!
//! Job counters and durations are recorded through the `metrics` facade and
//! exported by the Prometheus exporter's built-in HTTP listener when an
//! address is configured.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use clipsight_core::JobKind;

/// Install the Prometheus exporter. A missing address disables export;
/// recording macros become no-ops against the default recorder.
pub fn init_metrics(addr: Option<&str>) {
    let Some(addr) = addr else {
        tracing::info!("Metrics exporter disabled");
        return;
    };

    let parsed: SocketAddr = match addr.parse() {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!(addr, error = %e, "Invalid metrics address");
            return;
        }
    };

    match PrometheusBuilder::new().with_http_listener(parsed).install() {
        Ok(()) => tracing::info!(%parsed, "Prometheus metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_job(kind: JobKind, success: bool) {
    metrics::counter!(
        "clipsight_jobs_total",
        "kind" => kind.as_str(),
        "success" => if success { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_job_duration(kind: JobKind, seconds: f64) {
    metrics::histogram!("clipsight_job_duration_seconds", "kind" => kind.as_str())
        .record(seconds);
}

pub fn record_connections(count: usize) {
    metrics::gauge!("clipsight_active_connections").set(count as f64);
}
