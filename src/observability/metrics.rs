//! # Metrics Collection
//!
//! Prometheus metrics for identity rotation, TLS handshakes and discovery
//! admission. Recording is a no-op until [`init_metrics`] installs the
//! recorder, so components record unconditionally.

use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

use crate::config::ObservabilityConfig;
use crate::{Error, Result};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Metrics recorder that tracks application metrics
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// A bundle replaced the previous identity
    pub fn record_identity_published(&self, source: &str, not_after_unix: i64) {
        let labels = [("source", source.to_string())];
        counter!("meshplane_identity_publishes_total", &labels).increment(1);
        gauge!("meshplane_identity_expiry_timestamp_seconds").set(not_after_unix as f64);
    }

    /// Outcome of one signing attempt (`issued`, `failed`)
    pub fn record_rotation_attempt(&self, outcome: &str) {
        let labels = [("outcome", outcome.to_string())];
        counter!("meshplane_cert_rotation_attempts_total", &labels).increment(1);
    }

    /// The rotator gave up on a renewal cycle
    pub fn record_rotation_abandoned(&self) {
        counter!("meshplane_cert_rotation_abandoned_total").increment(1);
    }

    /// A watched file reload exhausted its retries
    pub fn record_file_reload_failure(&self) {
        counter!("meshplane_identity_reload_failures_total").increment(1);
    }

    pub fn record_handshake_failure(&self, listener: &'static str) {
        counter!("meshplane_tls_handshake_failures_total", "listener" => listener).increment(1);
    }

    pub fn record_admission_rejection(&self) {
        counter!("meshplane_admission_rejections_total").increment(1);
    }

    pub fn set_active_sessions(&self, active: usize) {
        gauge!("meshplane_xds_sessions_active").set(active as f64);
    }

    /// Register metric descriptions with the exporter
    pub fn register_metrics(&self) {
        describe_counter!(
            "meshplane_identity_publishes_total",
            Unit::Count,
            "Certificate bundles published to the identity store, by producer"
        );
        describe_gauge!(
            "meshplane_identity_expiry_timestamp_seconds",
            Unit::Seconds,
            "Expiry of the currently served leaf certificate as a unix timestamp"
        );
        describe_counter!(
            "meshplane_cert_rotation_attempts_total",
            Unit::Count,
            "Signing requests sent to the certificate authority, by outcome"
        );
        describe_counter!(
            "meshplane_cert_rotation_abandoned_total",
            Unit::Count,
            "Renewal cycles abandoned after exhausting retries"
        );
        describe_counter!(
            "meshplane_identity_reload_failures_total",
            Unit::Count,
            "Watched identity file reloads that kept the previous bundle"
        );
        describe_counter!(
            "meshplane_tls_handshake_failures_total",
            Unit::Count,
            "Failed TLS handshakes, by listener"
        );
        describe_counter!(
            "meshplane_admission_rejections_total",
            Unit::Count,
            "Discovery sessions refused by the admission limit"
        );
        describe_gauge!(
            "meshplane_xds_sessions_active",
            Unit::Count,
            "Currently admitted discovery sessions"
        );
    }
}

/// Install the Prometheus recorder once and return its render handle.
///
/// Returns `Ok(None)` when metrics are disabled.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    if !config.enable_metrics {
        return Ok(None);
    }

    let handle = PROMETHEUS.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .add_global_label("service", &config.service_name)
            .install_recorder()
            .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {e}")))?;

        MetricsRecorder::new().register_metrics();
        info!(service_name = %config.service_name, "Metrics collection initialized");
        Ok::<_, Error>(handle)
    })?;

    Ok(Some(handle.clone()))
}

/// Handle of the installed recorder, if any
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS.get().cloned()
}
