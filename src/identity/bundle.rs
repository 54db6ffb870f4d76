//! Certificate bundles: the (chain, key, trust anchor) triple served over TLS.
//!
//! A bundle is parsed and checked once when it is built and is immutable
//! afterwards. Producers build a new bundle for every change and hand it to
//! the store; nothing edits a published bundle in place.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use x509_parser::{extensions::GeneralName, prelude::X509Certificate};

use crate::errors::TlsError;

/// Metadata extracted from the leaf certificate for logging and scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    /// Length of the validity window.
    pub fn lifetime(&self) -> ChronoDuration {
        self.not_after - self.not_before
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }

    /// Instant at which `fraction` of the validity window has elapsed.
    pub fn renewal_time(&self, fraction: f64) -> DateTime<Utc> {
        self.renewal_time_from(self.not_before, fraction)
    }

    /// Like [`renewal_time`](Self::renewal_time), but measured over the
    /// window from `start` (clamped into the validity window) to `not_after`.
    pub fn renewal_time_from(&self, start: DateTime<Utc>, fraction: f64) -> DateTime<Utc> {
        let start = start.max(self.not_before).min(self.not_after);
        let fraction = fraction.clamp(0.0, 1.0);
        let remaining_ms = (self.not_after - start).num_milliseconds().max(0) as f64;
        start + ChronoDuration::milliseconds((remaining_ms * fraction) as i64)
    }
}

/// Where a bundle's PEM inputs came from, used in error messages.
#[derive(Debug, Clone, Copy)]
pub struct PemOrigins<'a> {
    pub certificate: &'a str,
    pub private_key: &'a str,
    pub trust_anchor: &'a str,
}

impl Default for PemOrigins<'_> {
    fn default() -> Self {
        Self {
            certificate: "certificate PEM",
            private_key: "private key PEM",
            trust_anchor: "CA certificate PEM",
        }
    }
}

/// A matched certificate chain and private key plus the CA that issued it.
pub struct CertificateBundle {
    chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    trust_anchors: Vec<CertificateDer<'static>>,
    trust_anchor_pem: Vec<u8>,
    certified_key: Arc<CertifiedKey>,
    info: CertificateInfo,
    fingerprint: String,
}

impl CertificateBundle {
    /// Parse a bundle from PEM inputs.
    ///
    /// The chain must start with the leaf. The key must be the leaf's key and
    /// usable for TLS signing. Validity dates are not enforced here.
    pub fn from_pem(
        cert_chain_pem: &[u8],
        private_key_pem: &[u8],
        trust_anchor_pem: &[u8],
    ) -> Result<Self, TlsError> {
        Self::from_pem_with_origins(
            cert_chain_pem,
            private_key_pem,
            trust_anchor_pem,
            PemOrigins::default(),
        )
    }

    pub fn from_pem_with_origins(
        cert_chain_pem: &[u8],
        private_key_pem: &[u8],
        trust_anchor_pem: &[u8],
        origins: PemOrigins<'_>,
    ) -> Result<Self, TlsError> {
        let chain = parse_certificates(cert_chain_pem, origins.certificate)?;
        let trust_anchors = parse_certificates(trust_anchor_pem, origins.trust_anchor)?;

        let private_key = PrivateKeyDer::from_pem_slice(private_key_pem).map_err(|err| {
            TlsError::InvalidPrivateKey {
                origin: origins.private_key.to_string(),
                source: Some(anyhow!(err)),
            }
        })?;

        let signing_key = rustls::crypto::ring::sign::any_supported_type(&private_key).map_err(|err| {
            TlsError::InvalidPrivateKey {
                origin: origins.private_key.to_string(),
                source: Some(anyhow!(err)),
            }
        })?;

        let (_, leaf) = x509_parser::parse_x509_certificate(chain[0].as_ref()).map_err(|err| {
            TlsError::CertificateMetadata {
                origin: origins.certificate.to_string(),
                source: anyhow!("failed to parse leaf certificate: {err}"),
            }
        })?;

        let info = certificate_info(&leaf, origins.certificate)?;

        // Compares the key's public half with the leaf's SubjectPublicKeyInfo
        // for every key encoding, SEC1 included.
        let certified_key = CertifiedKey::new(chain.clone(), signing_key);
        certified_key.keys_match().map_err(|_| TlsError::CertificateKeyMismatch)?;
        let certified_key = Arc::new(certified_key);

        let fingerprint = fingerprint(&chain, &private_key, trust_anchor_pem);

        Ok(Self {
            chain,
            private_key,
            trust_anchors,
            trust_anchor_pem: trust_anchor_pem.to_vec(),
            certified_key,
            info,
            fingerprint,
        })
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }

    /// Leaf followed by any intermediates.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.private_key
    }

    pub fn trust_anchors(&self) -> &[CertificateDer<'static>] {
        &self.trust_anchors
    }

    pub fn trust_anchor_pem(&self) -> &[u8] {
        &self.trust_anchor_pem
    }

    /// Chain and signing key prepared for rustls, built once per bundle.
    pub fn certified_key(&self) -> &Arc<CertifiedKey> {
        &self.certified_key
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// Hex SHA-256 over chain, key and trust anchor.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Reject bundles outside their validity window.
    pub fn check_validity(&self, path: &Path, now: DateTime<Utc>) -> Result<(), TlsError> {
        if self.info.not_before > now {
            return Err(TlsError::CertificateNotYetValid {
                path: path.to_path_buf(),
                not_before: self.info.not_before,
            });
        }
        if self.info.is_expired_at(now) {
            return Err(TlsError::CertificateExpired {
                path: path.to_path_buf(),
                not_after: self.info.not_after,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("subject", &self.info.subject)
            .field("not_after", &self.info.not_after)
            .field("chain_len", &self.chain.len())
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn parse_certificates(pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certificates: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem)
        .map(|result| {
            result.map_err(|err| TlsError::InvalidCertificatePem {
                origin: origin.to_string(),
                source: anyhow!(err),
            })
        })
        .collect::<Result<_, _>>()?;

    if certificates.is_empty() {
        return Err(TlsError::EmptyCertificateChain { origin: origin.to_string() });
    }
    Ok(certificates)
}

fn certificate_info(cert: &X509Certificate<'_>, origin: &str) -> Result<CertificateInfo, TlsError> {
    let timestamp = |ts: i64| {
        DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| TlsError::CertificateMetadata {
            origin: origin.to_string(),
            source: anyhow!("certificate time {ts} out of range"),
        })
    };

    let dns_names = match cert.subject_alternative_name() {
        Ok(Some(extension)) => extension
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        Ok(None) => Vec::new(),
        Err(err) => {
            return Err(TlsError::CertificateMetadata {
                origin: origin.to_string(),
                source: anyhow!("invalid subjectAltName extension: {err}"),
            })
        }
    };

    Ok(CertificateInfo {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_before: timestamp(cert.validity().not_before.timestamp())?,
        not_after: timestamp(cert.validity().not_after.timestamp())?,
        dns_names,
    })
}

fn fingerprint(
    chain: &[CertificateDer<'static>],
    private_key: &PrivateKeyDer<'static>,
    trust_anchor_pem: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    for certificate in chain {
        hasher.update(certificate.as_ref());
    }
    hasher.update(private_key.secret_der());
    hasher.update(trust_anchor_pem);
    hex::encode(hasher.finalize())
}
