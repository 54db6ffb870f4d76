use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::env_string;
use crate::{errors::TlsError, Result};

/// Static identity paths and the handshake cipher allow-list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsOptions {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_cert_file: Option<PathBuf>,

    /// IANA cipher suite names; empty keeps the provider defaults
    pub cipher_suites: Vec<String>,
}

impl TlsOptions {
    /// Load TLS options from environment variables.
    pub fn from_env() -> Result<Self> {
        let cipher_suites = env_string("MESHPLANE_TLS_CIPHER_SUITES")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let options = Self {
            cert_file: env_string("MESHPLANE_TLS_CERT_FILE").map(PathBuf::from),
            key_file: env_string("MESHPLANE_TLS_KEY_FILE").map(PathBuf::from),
            ca_cert_file: env_string("MESHPLANE_TLS_CA_CERT_FILE").map(PathBuf::from),
            cipher_suites,
        };
        options.check_paths()?;
        Ok(options)
    }

    /// True when any of the three static paths was set.
    pub fn has_static_paths(&self) -> bool {
        self.cert_file.is_some() || self.key_file.is_some() || self.ca_cert_file.is_some()
    }

    /// Static paths are all-or-nothing.
    pub fn check_paths(&self) -> std::result::Result<(), TlsError> {
        if !self.has_static_paths() {
            return Ok(());
        }
        if self.cert_file.is_none() {
            return Err(TlsError::IncompletePaths { missing: "certificate" });
        }
        if self.key_file.is_none() {
            return Err(TlsError::IncompletePaths { missing: "private key" });
        }
        if self.ca_cert_file.is_none() {
            return Err(TlsError::IncompletePaths { missing: "CA certificate" });
        }
        Ok(())
    }
}
