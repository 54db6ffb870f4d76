//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for a single module without touching the config, e.g.
//! `RUST_LOG=meshplane::identity=debug`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::{Error, Result};

/// Create a tracing span for a discovery session.
///
/// `node_id` starts empty; record it once the agent identifies itself.
#[macro_export]
macro_rules! xds_span {
    ($operation:expr, $session_id:expr) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            session_id = %$session_id,
            node_id = tracing::field::Empty
        )
    };
    ($operation:expr, $session_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "xds_operation",
            operation = %$operation,
            session_id = %$session_id,
            node_id = tracing::field::Empty,
            $($field)*
        )
    };
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| Error::config(format!("Invalid log level '{}': {e}", config.log_level)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry.with(fmt::layer().json().with_current_span(true).with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::internal(format!("Failed to install log subscriber: {e}")))
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::Config) {
    let addr = |addr: Option<std::net::SocketAddr>| {
        addr.map(|a| a.to_string()).unwrap_or_else(|| "disabled".to_string())
    };

    tracing::info!(
        http_addr = %addr(config.server.http_addr),
        grpc_addr = %addr(config.server.grpc_addr),
        secure_grpc_addr = %addr(config.server.secure_grpc_addr),
        https_addr = %addr(config.server.https_addr),
        monitoring_addr = %addr(config.server.monitoring_addr),
        namespace = %config.mesh.namespace,
        revision = %config.mesh.revision,
        cert_provider = %config.identity.cert_provider,
        enable_ca = config.identity.enable_ca,
        static_identity = config.tls.has_static_paths(),
        max_connections = config.admission.max_connections,
        "meshplane configuration"
    );
}
