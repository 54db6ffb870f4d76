//! External certificate authority interface.
//!
//! The rotator talks to a [`CertificateSigner`]: it submits a
//! [`SigningRequest`] carrying a freshly generated CSR and receives the
//! issued chain plus the authority's trust anchor.

use std::time::Duration;

use async_trait::async_trait;
use rcgen::{CertificateParams, DnType, KeyPair};
use zeroize::Zeroizing;

use crate::errors::SigningError;

/// Certificate signing request submitted to the authority.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// Host names the leaf must cover
    pub subject_names: Vec<String>,
    /// Signer identity the authority routes the request by
    pub signer_name: String,
    pub requested_lifetime: Duration,
    /// PKCS#10 request in PEM form
    pub csr_pem: String,
}

/// A newly generated key plus the request that asks for its certificate.
pub struct PendingRequest {
    pub request: SigningRequest,
    pub private_key_pem: Zeroizing<String>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

impl SigningRequest {
    /// Generate a new P-256 key and a CSR for `subject_names`.
    ///
    /// A new key is produced on every call; keys are never reused across
    /// renewals.
    pub fn generate(
        subject_names: &[String],
        signer_name: &str,
        requested_lifetime: Duration,
    ) -> Result<PendingRequest, SigningError> {
        let key_pair = KeyPair::generate()
            .map_err(|e| SigningError::Request(format!("failed to generate key: {e}")))?;

        let mut params = CertificateParams::new(subject_names.to_vec())
            .map_err(|e| SigningError::Request(format!("invalid subject name: {e}")))?;
        if let Some(first) = subject_names.first() {
            params.distinguished_name.push(DnType::CommonName, first.as_str());
        }

        let csr_pem = params
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| SigningError::Request(format!("failed to create CSR: {e}")))?;

        Ok(PendingRequest {
            request: SigningRequest {
                subject_names: subject_names.to_vec(),
                signer_name: signer_name.to_string(),
                requested_lifetime,
                csr_pem,
            },
            private_key_pem: Zeroizing::new(key_pair.serialize_pem()),
        })
    }
}

/// What the authority hands back for an approved request.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    /// Leaf first, then any intermediates
    pub certificate_chain_pem: String,
    /// The authority's root, used as the bundle trust anchor
    pub trust_anchor_pem: String,
}

/// Issuing service used by the rotator.
///
/// Implementations must be cheap to call concurrently; the rotator applies
/// its own deadline around [`CertificateSigner::sign`].
#[async_trait]
pub trait CertificateSigner: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn sign(&self, request: SigningRequest) -> Result<SignedCertificate, SigningError>;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap for exponential growth
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::signing()
    }
}

impl RetryConfig {
    /// Policy for CA signing requests.
    pub fn signing() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }

    /// Policy for re-reading watched identity files.
    pub fn file_reload() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before attempt number `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32 - 1);
        let backoff_ms = self.initial_backoff.as_millis() as f64 * multiplier;
        let capped_ms = backoff_ms.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }
}
