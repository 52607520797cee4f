//! Metrics recorder initialization.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::{Error, Result};

/// Histogram buckets for worker-cycle durations — a 1-hour-interval batch
/// job has a much longer tail than a websocket frame handler.
const TRUST_WORKER_DURATION_BUCKETS: &[f64] = &[
    0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Handle to the installed recorder, used to render the `/metrics` endpoint.
#[derive(Clone)]
pub struct MetricsHandle {
    prometheus_handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

/// Install the global recorder. Call once at gateway startup.
///
/// # Errors
/// Returns an error if a recorder is already installed or the builder
/// rejects a bucket matcher.
pub fn init_metrics() -> Result<MetricsHandle> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(crate::trust_worker::CYCLE_DURATION_SECONDS.to_string()),
        TRUST_WORKER_DURATION_BUCKETS,
    )?;
    let handle = builder.install_recorder().map_err(Error::from)?;
    info!("prometheus metrics recorder installed");
    Ok(MetricsHandle {
        prometheus_handle: handle,
    })
}
