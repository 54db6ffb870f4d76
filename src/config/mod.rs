//! # Configuration Management
//!
//! Configuration is read once at startup from `MESHPLANE_*` environment
//! variables and is immutable afterwards.

pub mod identity;
pub mod settings;
pub mod tls;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use validator::Validate;

pub use identity::{CertProvider, IdentityConfig};
pub use settings::{AdmissionConfig, MeshConfig, ObservabilityConfig, ServerOptions};
pub use tls::TlsOptions;

use crate::{Error, Result};

/// Complete process configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerOptions,
    pub tls: TlsOptions,
    pub identity: IdentityConfig,
    pub mesh: MeshConfig,
    pub admission: AdmissionConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            server: ServerOptions::from_env()?,
            tls: TlsOptions::from_env()?,
            identity: IdentityConfig::from_env()?,
            mesh: MeshConfig::from_env(),
            admission: AdmissionConfig::from_env()?,
            observability: ObservabilityConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.identity.validate()?;
        self.mesh.validate()?;
        self.admission.validate()?;
        self.observability.validate()?;
        self.tls.check_paths()?;
        Ok(())
    }
}

/// Parse a listen address. Empty disables the listener, `:port` binds all
/// interfaces and `localhost` maps to the loopback address.
pub fn parse_listen_addr(value: &str) -> Result<Option<SocketAddr>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Some(port) = value.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::config(format!("Invalid listen address '{value}': {e}")))?;
        return Ok(Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)));
    }

    if let Some(port) = value.strip_prefix("localhost:") {
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::config(format!("Invalid listen address '{value}': {e}")))?;
        return Ok(Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)));
    }

    value
        .parse::<SocketAddr>()
        .map(Some)
        .map_err(|e| Error::config(format!("Invalid listen address '{value}': {e}")))
}

/// Non-empty, trimmed value of an environment variable.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(value) => value
            .parse()
            .map_err(|e| Error::config(format!("Invalid value for {key} ('{value}'): {e}"))),
        None => Ok(default),
    }
}
