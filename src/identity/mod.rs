//! # Serving Identity
//!
//! Everything that produces, validates and holds the certificate bundle the
//! TLS listeners present: SAN resolution, the bundle store, the file and CA
//! producers, and the startup choice between them.

pub mod authority;
pub mod bundle;
pub mod file_loader;
pub mod rotator;
pub mod san;
pub mod signer;
pub mod source;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use authority::LocalAuthority;
pub use bundle::{CertificateBundle, CertificateInfo, PemOrigins};
pub use file_loader::{CertificatePaths, FileCertificateLoader};
pub use rotator::{CertificateRotator, RotationHandle, RotationSettings, RotationState};
pub use san::resolve_san_set;
pub use signer::{CertificateSigner, RetryConfig, SignedCertificate, SigningRequest};
pub use source::{bootstrap, IdentityRuntime, IdentitySource};
pub use store::{BundleStore, PublishOutcome, SubscriptionId};
