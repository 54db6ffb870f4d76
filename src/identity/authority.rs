//! In-process certificate authority backing the `builtin` provider.

use async_trait::async_trait;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    SanType,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, info};

use super::signer::{CertificateSigner, SignedCertificate, SigningRequest};
use crate::errors::SigningError;

const ROOT_VALIDITY_DAYS: i64 = 3650;
/// Backdating applied to issued leaves to absorb clock skew.
const CLOCK_SKEW: TimeDuration = TimeDuration::minutes(1);

/// Self-signed root generated at startup that signs CSRs for one signer name.
pub struct LocalAuthority {
    signer_name: String,
    root_pem: String,
    root_key: KeyPair,
    root_not_after: OffsetDateTime,
}

impl std::fmt::Debug for LocalAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthority")
            .field("signer_name", &self.signer_name)
            .field("root_not_after", &self.root_not_after)
            .finish_non_exhaustive()
    }
}

impl LocalAuthority {
    /// Generate a new root for `signer_name`.
    pub fn generate(signer_name: &str, common_name: &str) -> Result<Self, SigningError> {
        let root_key = KeyPair::generate()
            .map_err(|e| SigningError::Request(format!("failed to generate root key: {e}")))?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, "meshplane");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - CLOCK_SKEW;
        params.not_after = now + TimeDuration::days(ROOT_VALIDITY_DAYS);
        let root_not_after = params.not_after;

        let root = params
            .self_signed(&root_key)
            .map_err(|e| SigningError::Request(format!("failed to self-sign root: {e}")))?;

        info!(signer = %signer_name, common_name = %common_name, "Generated local certificate authority");

        Ok(Self { signer_name: signer_name.to_string(), root_pem: root.pem(), root_key, root_not_after })
    }

    pub fn trust_anchor_pem(&self) -> &str {
        &self.root_pem
    }

    fn issue(&self, request: &SigningRequest) -> Result<String, SigningError> {
        let denied = |reason: String| SigningError::Denied {
            signer: self.signer_name.clone(),
            reason,
        };

        if request.signer_name != self.signer_name {
            return Err(denied(format!("unknown signer '{}'", request.signer_name)));
        }
        if request.subject_names.is_empty() {
            return Err(denied("request names no subjects".to_string()));
        }

        let mut csr = CertificateSigningRequestParams::from_pem(&request.csr_pem)
            .map_err(|e| denied(format!("failed to parse CSR: {e}")))?;

        let subject_alt_names = request
            .subject_names
            .iter()
            .map(|name| {
                Ia5String::try_from(name.as_str())
                    .map(SanType::DnsName)
                    .map_err(|e| denied(format!("invalid subject name '{name}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = OffsetDateTime::now_utc();
        let requested_not_after = now + request.requested_lifetime;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, request.subject_names[0].as_str());
        csr.params.distinguished_name = dn;
        csr.params.subject_alt_names = subject_alt_names;
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages =
            vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        csr.params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        csr.params.not_before = now - CLOCK_SKEW;
        csr.params.not_after = requested_not_after.min(self.root_not_after);

        let issuer = Issuer::from_ca_cert_pem(&self.root_pem, &self.root_key)
            .map_err(|e| SigningError::Request(format!("failed to load issuer: {e}")))?;
        let certificate = csr
            .signed_by(&issuer)
            .map_err(|e| denied(format!("failed to sign certificate: {e}")))?;

        debug!(
            signer = %self.signer_name,
            subjects = ?request.subject_names,
            lifetime_secs = request.requested_lifetime.as_secs(),
            "Issued certificate"
        );
        Ok(certificate.pem())
    }
}

#[async_trait]
impl CertificateSigner for LocalAuthority {
    fn name(&self) -> &str {
        &self.signer_name
    }

    async fn sign(&self, request: SigningRequest) -> Result<SignedCertificate, SigningError> {
        let certificate_chain_pem = self.issue(&request)?;
        Ok(SignedCertificate { certificate_chain_pem, trust_anchor_pem: self.root_pem.clone() })
    }
}
