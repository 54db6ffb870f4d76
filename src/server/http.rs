//! Routers for the plaintext HTTP and monitoring listeners.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::identity::BundleStore;
use crate::xds::{AggregatedDiscovery, ADS_SERVICE_PATH};
use crate::{APP_NAME, VERSION};

/// Identity summary returned by `/debug/identity`.
#[derive(Debug, Serialize)]
pub struct IdentitySummary {
    pub subject: String,
    pub issuer: String,
    pub not_before: chrono::DateTime<chrono::Utc>,
    pub not_after: chrono::DateTime<chrono::Utc>,
    pub dns_names: Vec<String>,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Router for the plaintext HTTP listener, also served over HTTPS.
///
/// With `discovery` set, ADS is reachable on this port over h2c (or h2 on
/// the HTTPS listener).
pub fn build_router(
    store: Arc<BundleStore>,
    discovery: Option<AggregatedDiscoveryServiceServer<AggregatedDiscovery>>,
) -> Router {
    let router = Router::new()
        .route("/ready", get(ready))
        .route("/debug/identity", get(identity))
        .with_state(store);

    let router = match discovery {
        Some(discovery) => router.route_service(&format!("{ADS_SERVICE_PATH}/{{*method}}"), discovery),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

/// Router for the monitoring listener.
pub fn build_monitoring_router(metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/version", get(version))
        .with_state(metrics)
}

async fn ready() -> StatusCode {
    StatusCode::OK
}

async fn identity(State(store): State<Arc<BundleStore>>) -> Response {
    match store.current() {
        Ok(bundle) => {
            let info = bundle.info();
            Json(IdentitySummary {
                subject: info.subject.clone(),
                issuer: info.issuer.clone(),
                not_before: info.not_before,
                not_after: info.not_after,
                dns_names: info.dns_names.clone(),
                fingerprint: bundle.fingerprint().to_string(),
            })
            .into_response()
        }
        Err(err) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorBody { error: err.to_string() }))
                .into_response()
        }
    }
}

async fn render_metrics(State(metrics): State<Option<PrometheusHandle>>) -> Response {
    match metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "name": APP_NAME, "version": VERSION }))
}
