use std::time::Duration;

use thiserror::Error;

/// Errors returned by a certificate signer.
///
/// The rotator treats every variant as transient: it backs off and retries
/// until its attempt budget runs out.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The authority explicitly refused the request.
    #[error("Signing request denied by {signer}: {reason}")]
    Denied { signer: String, reason: String },

    /// No answer arrived within the request deadline.
    #[error("Signing request timed out after {0:?}")]
    Timeout(Duration),

    /// The authority could not be reached.
    #[error("Certificate authority unavailable: {0}")]
    Unavailable(String),

    /// The authority answered with material that cannot be used.
    #[error("Certificate authority returned an unusable certificate: {0}")]
    InvalidResponse(String),

    /// The request itself could not be built (key generation, CSR encoding).
    #[error("Failed to build signing request: {0}")]
    Request(String),
}
