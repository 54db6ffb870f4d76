//! # Error Handling
//!
//! Error types for the meshplane identity and serving layer. Certificate and
//! key problems surface as [`TlsError`], failures of the external signing
//! service as [`SigningError`]; both fold into the top-level [`Error`].

pub mod signing;
pub mod tls;

pub use signing::SigningError;
pub use tls::TlsError;

/// Custom result type for meshplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the meshplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (gRPC, HTTP, TLS listeners)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Certificate, key or trust anchor could not be used
    #[error(transparent)]
    Tls(#[from] TlsError),

    /// The certificate authority refused or failed a request
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// No identity has been published yet
    #[error("Identity is not ready: no certificate bundle has been published")]
    IdentityNotReady,

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// True when the error only means no bundle has been published yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::IdentityNotReady)
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Config(format!("Validation failed: {errors}"))
    }
}
