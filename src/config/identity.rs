use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{env_bool, env_parse, env_string};
use crate::{Error, Result};

/// Which authority issues the serving certificate when no static files exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertProvider {
    /// In-process authority with a self-signed root
    Builtin,
    /// Embedder supplied signer, e.g. a cluster CSR approval service
    External,
    /// Never issue; only static files can provide an identity
    None,
}

impl CertProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::External => "external",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for CertProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertProvider {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "builtin" | "" => Ok(Self::Builtin),
            "external" | "kubernetes" => Ok(Self::External),
            "none" => Ok(Self::None),
            other => Err(Error::config(format!(
                "Unknown certificate provider '{other}' (expected builtin, external or none)"
            ))),
        }
    }
}

/// Settings for CA-issued identities and the well-known file locations.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IdentityConfig {
    /// Master switch for CA rotation
    pub enable_ca: bool,

    pub cert_provider: CertProvider,

    /// Signer identity placed on every signing request
    #[validate(length(min = 1, message = "Signer name cannot be empty"))]
    pub signer_name: String,

    /// Requested leaf lifetime in seconds
    #[validate(range(min = 60, message = "Certificate lifetime must be at least 60 seconds"))]
    pub cert_lifetime_seconds: u64,

    /// Fraction of the validity window after which renewal starts
    #[validate(range(min = 0.05, max = 0.95, message = "Rotation fraction must be in 0.05..=0.95"))]
    pub rotation_fraction: f64,

    /// Directory holding the well-known `tls/` and `ca/` identity files
    pub cert_dir: PathBuf,

    /// Poll interval backing up the file watch
    #[validate(range(min = 1, message = "Poll interval must be at least 1 second"))]
    pub file_poll_seconds: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enable_ca: true,
            cert_provider: CertProvider::Builtin,
            signer_name: "meshplane.io/serving".to_string(),
            cert_lifetime_seconds: 24 * 60 * 60,
            rotation_fraction: 0.5,
            cert_dir: PathBuf::from("./var/run/secrets/meshplane"),
            file_poll_seconds: 30,
        }
    }
}

impl IdentityConfig {
    pub fn cert_lifetime(&self) -> Duration {
        Duration::from_secs(self.cert_lifetime_seconds)
    }

    pub fn file_poll_interval(&self) -> Duration {
        Duration::from_secs(self.file_poll_seconds)
    }

    /// True when the CA rotator may drive the store.
    pub fn ca_rotation_enabled(&self) -> bool {
        self.enable_ca && self.cert_provider != CertProvider::None
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let cert_provider = match env_string("MESHPLANE_CERT_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.cert_provider,
        };

        Ok(Self {
            enable_ca: env_bool("MESHPLANE_ENABLE_CA", defaults.enable_ca),
            cert_provider,
            signer_name: env_string("MESHPLANE_CERT_SIGNER").unwrap_or(defaults.signer_name),
            cert_lifetime_seconds: env_parse(
                "MESHPLANE_CERT_LIFETIME_SECS",
                defaults.cert_lifetime_seconds,
            )?,
            rotation_fraction: env_parse(
                "MESHPLANE_CERT_ROTATION_FRACTION",
                defaults.rotation_fraction,
            )?,
            cert_dir: env_string("MESHPLANE_CERT_DIR").map(PathBuf::from).unwrap_or(defaults.cert_dir),
            file_poll_seconds: env_parse("MESHPLANE_FILE_POLL_SECS", defaults.file_poll_seconds)?,
        })
    }
}
