use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures while reading, parsing or validating identity material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A file identity was configured without all of cert, key and CA paths.
    #[error("Static identity requires certificate, key and CA paths; missing {missing}")]
    IncompletePaths { missing: &'static str },

    /// The certificate file could not be read.
    #[error("Failed to read certificate at {path}: {source}")]
    CertificateReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The private key file could not be read.
    #[error("Failed to read private key at {path}: {source}")]
    PrivateKeyReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The trust anchor file could not be read.
    #[error("Failed to read CA certificate at {path}: {source}")]
    TrustAnchorReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No certificates were found where at least one was required.
    #[error("{origin} does not contain any certificates")]
    EmptyCertificateChain { origin: String },

    /// The certificate PEM contents were invalid or unreadable.
    #[error("{origin} is not a valid certificate PEM: {source}")]
    InvalidCertificatePem {
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// The private key PEM contents were invalid or unsupported.
    #[error("{origin} does not contain a supported private key")]
    InvalidPrivateKey {
        origin: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The supplied certificate and key do not match.
    #[error("Certificate and private key do not match")]
    CertificateKeyMismatch,

    /// The certificate is not yet valid.
    #[error("Certificate at {path} is not valid before {not_before}")]
    CertificateNotYetValid { path: PathBuf, not_before: DateTime<Utc> },

    /// The certificate is expired.
    #[error("Certificate at {path} expired at {not_after}")]
    CertificateExpired { path: PathBuf, not_after: DateTime<Utc> },

    /// Generic metadata extraction failure.
    #[error("Failed to extract certificate metadata from {origin}: {source}")]
    CertificateMetadata {
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// A configured cipher suite name is not known to the crypto provider.
    #[error("Unknown cipher suite '{name}'. Available: {available}")]
    UnknownCipherSuite { name: String, available: String },

    /// rustls refused to build a server configuration.
    #[error("Failed to build TLS server configuration: {0}")]
    ServerConfig(String),
}
