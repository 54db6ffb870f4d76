//! # Configuration Settings
//!
//! Listener, admission, naming and observability settings. Each struct has a
//! `Default` matching the production defaults and a `from_env` constructor.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{env_bool, env_parse, env_string, parse_listen_addr};
use crate::Result;

/// Addresses the multiplexed server binds. `None` disables that listener.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerOptions {
    /// Plaintext HTTP/1.1 and h2c
    pub http_addr: Option<SocketAddr>,

    /// Prometheus scrape and version endpoints
    pub monitoring_addr: Option<SocketAddr>,

    /// Cleartext gRPC discovery
    pub grpc_addr: Option<SocketAddr>,

    /// TLS gRPC discovery, client certificates verified when presented
    pub secure_grpc_addr: Option<SocketAddr>,

    /// Combined HTTPS listener serving the HTTP router over TLS
    pub https_addr: Option<SocketAddr>,

    /// Drain window for in-flight sessions on shutdown
    #[validate(range(max = 600, message = "Shutdown grace must be at most 600 seconds"))]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            http_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            monitoring_addr: Some(SocketAddr::from(([0, 0, 0, 0], 15014))),
            grpc_addr: Some(SocketAddr::from(([0, 0, 0, 0], 15010))),
            secure_grpc_addr: Some(SocketAddr::from(([0, 0, 0, 0], 15012))),
            https_addr: None,
            shutdown_grace_seconds: 10,
        }
    }
}

impl ServerOptions {
    /// All listeners disabled; tests switch on the ones they need.
    pub fn disabled() -> Self {
        Self {
            http_addr: None,
            monitoring_addr: None,
            grpc_addr: None,
            secure_grpc_addr: None,
            https_addr: None,
            shutdown_grace_seconds: 1,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            http_addr: listen_addr_from_env("MESHPLANE_HTTP_ADDR", defaults.http_addr)?,
            monitoring_addr: listen_addr_from_env(
                "MESHPLANE_MONITORING_ADDR",
                defaults.monitoring_addr,
            )?,
            grpc_addr: listen_addr_from_env("MESHPLANE_GRPC_ADDR", defaults.grpc_addr)?,
            secure_grpc_addr: listen_addr_from_env(
                "MESHPLANE_SECURE_GRPC_ADDR",
                defaults.secure_grpc_addr,
            )?,
            https_addr: listen_addr_from_env("MESHPLANE_HTTPS_ADDR", defaults.https_addr)?,
            shutdown_grace_seconds: env_parse(
                "MESHPLANE_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace_seconds,
            )?,
        })
    }
}

fn listen_addr_from_env(key: &str, default: Option<SocketAddr>) -> Result<Option<SocketAddr>> {
    match std::env::var(key) {
        Ok(value) => parse_listen_addr(&value),
        Err(_) => Ok(default),
    }
}

/// Limits applied to new discovery sessions.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdmissionConfig {
    /// Maximum concurrent discovery sessions (0 = unlimited)
    pub max_connections: usize,

    /// Sustained rate of new session attempts per second (0 = unlimited)
    pub max_requests_per_second: u32,

    /// Token bucket capacity for bursts of session attempts
    #[validate(range(min = 1, message = "Burst must be at least 1"))]
    pub burst: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { max_connections: 0, max_requests_per_second: 25, burst: 25 }
    }
}

impl AdmissionConfig {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self { max_connections: 0, max_requests_per_second: 0, burst: 1 }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_connections: env_parse("MESHPLANE_MAX_CONNECTIONS", defaults.max_connections)?,
            max_requests_per_second: env_parse(
                "MESHPLANE_MAX_REQUESTS_PER_SECOND",
                defaults.max_requests_per_second,
            )?,
            burst: env_parse("MESHPLANE_REQUEST_BURST", defaults.burst)?,
        })
    }
}

/// Inputs to the SAN set: where this control plane runs and how it is addressed.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MeshConfig {
    #[validate(length(min = 1, message = "Namespace cannot be empty"))]
    pub namespace: String,

    /// Revision identifier; empty or `default` means the default revision
    pub revision: String,

    /// Base service name used in the templated aliases
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Legacy alias kept for agents configured against the old service
    #[validate(length(min = 1, message = "Legacy service name cannot be empty"))]
    pub legacy_service_name: String,

    /// Address agents use to reach discovery
    pub discovery_address: String,

    /// Comma separated extra host names
    pub custom_hosts: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            namespace: "mesh-system".to_string(),
            revision: String::new(),
            service_name: "meshd".to_string(),
            legacy_service_name: "mesh-pilot".to_string(),
            discovery_address: "meshd.mesh-system.svc:15012".to_string(),
            custom_hosts: String::new(),
        }
    }
}

impl MeshConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let namespace = env_string("MESHPLANE_NAMESPACE").unwrap_or(defaults.namespace);
        let service_name = env_string("MESHPLANE_SERVICE_NAME").unwrap_or(defaults.service_name);
        let discovery_address = env_string("MESHPLANE_DISCOVERY_ADDRESS")
            .unwrap_or_else(|| format!("{service_name}.{namespace}.svc:15012"));

        Self {
            revision: env_string("MESHPLANE_REVISION").unwrap_or_default(),
            legacy_service_name: env_string("MESHPLANE_LEGACY_SERVICE_NAME")
                .unwrap_or(defaults.legacy_service_name),
            custom_hosts: env_string("MESHPLANE_CUSTOM_HOST").unwrap_or_default(),
            namespace,
            service_name,
            discovery_address,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Service name attached to logs and metrics
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Install the Prometheus recorder
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: crate::APP_NAME.to_string(),
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: true,
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env_string("MESHPLANE_SERVICE_LABEL").unwrap_or(defaults.service_name),
            log_level: env_string("MESHPLANE_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: env_bool("MESHPLANE_LOG_JSON", defaults.json_logging),
            enable_metrics: env_bool("MESHPLANE_ENABLE_METRICS", defaults.enable_metrics),
        }
    }
}
