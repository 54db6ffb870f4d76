//! # Observability Infrastructure
//!
//! Structured logging and Prometheus metrics for the meshplane control plane.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, prometheus_handle, MetricsRecorder};

use ::tracing::info;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::ObservabilityConfig;
use crate::errors::Result;

/// Initialize logging and metrics.
///
/// Returns the Prometheus handle rendered by the monitoring listener, or
/// `None` when metrics are disabled.
pub fn init_observability(config: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    init_logging(config)?;
    let handle = init_metrics(config)?;

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = config.enable_metrics,
        "Observability initialized successfully"
    );

    Ok(handle)
}
