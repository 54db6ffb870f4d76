//! Startup choice of where the serving identity comes from.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::authority::LocalAuthority;
use super::file_loader::{CertificatePaths, FileCertificateLoader};
use super::rotator::{CertificateRotator, RotationHandle, RotationSettings};
use super::signer::CertificateSigner;
use super::store::BundleStore;
use crate::config::{CertProvider, IdentityConfig, TlsOptions};
use crate::{Config, Error, Result};

const LOCAL_ROOT_COMMON_NAME: &str = "meshplane local root CA";

/// Producer that drives the bundle store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// Static PEM files, reloaded on change
    Files(CertificatePaths),
    /// Leaf certificates issued and renewed by a certificate authority
    CaRotation,
    /// No identity; TLS listeners stay closed
    Absent,
}

impl IdentitySource {
    /// Static files always win, explicit paths before the well-known
    /// mount. CA rotation applies only when enabled with a provider.
    pub fn select(tls: &TlsOptions, identity: &IdentityConfig) -> Self {
        if let Some(paths) = CertificatePaths::from_options(tls) {
            return Self::Files(paths);
        }
        if let Some(paths) = CertificatePaths::well_known(&identity.cert_dir) {
            return Self::Files(paths);
        }
        if identity.ca_rotation_enabled() {
            return Self::CaRotation;
        }
        Self::Absent
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Files(_) => "files",
            Self::CaRotation => "ca",
            Self::Absent => "absent",
        }
    }
}

/// The identity subsystem after startup: the store plus whichever producer
/// feeds it.
#[derive(Debug)]
pub struct IdentityRuntime {
    store: Arc<BundleStore>,
    source: IdentitySource,
    rotation: Option<RotationHandle>,
    file_watch: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl IdentityRuntime {
    pub fn store(&self) -> &Arc<BundleStore> {
        &self.store
    }

    pub fn source(&self) -> &IdentitySource {
        &self.source
    }

    /// Whether TLS listeners should be opened at all.
    pub fn serves_tls(&self) -> bool {
        self.source != IdentitySource::Absent
    }

    pub fn rotation(&self) -> Option<&RotationHandle> {
        self.rotation.as_ref()
    }

    /// Stop the producer tasks and wait for them.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some(rotation) = self.rotation {
            rotation.join().await;
        }
        if let Some(watch) = self.file_watch {
            if let Err(err) = watch.await {
                warn!(error = %err, "Identity file watch task failed");
            }
        }
    }
}

/// Select the identity source and start its producer.
///
/// `subject_names` is the SAN set for CA-issued certificates.
/// `external_signer` backs the `external` provider; it is ignored otherwise.
/// A file identity is loaded before this returns and any error in it is
/// fatal. A CA identity is issued in the background, so the store may still
/// be empty when this returns.
pub async fn bootstrap(
    config: &Config,
    subject_names: Vec<String>,
    external_signer: Option<Arc<dyn CertificateSigner>>,
) -> Result<IdentityRuntime> {
    let store = Arc::new(BundleStore::new());
    let shutdown = CancellationToken::new();
    let source = IdentitySource::select(&config.tls, &config.identity);

    let mut runtime = IdentityRuntime {
        store: store.clone(),
        source: source.clone(),
        rotation: None,
        file_watch: None,
        shutdown: shutdown.clone(),
    };

    match source {
        IdentitySource::Files(paths) => {
            let loader =
                FileCertificateLoader::new(paths, store, config.identity.file_poll_interval());
            loader.load_initial().await?;
            runtime.file_watch = Some(loader.spawn(shutdown));
            info!(source = "files", "Serving identity from static files");
        }
        IdentitySource::CaRotation => {
            let signer = match config.identity.cert_provider {
                CertProvider::Builtin => Arc::new(LocalAuthority::generate(
                    &config.identity.signer_name,
                    LOCAL_ROOT_COMMON_NAME,
                )?) as Arc<dyn CertificateSigner>,
                CertProvider::External => external_signer.ok_or_else(|| {
                    Error::config("Certificate provider 'external' requires a signer")
                })?,
                CertProvider::None => {
                    return Err(Error::internal("CA rotation selected without a provider"))
                }
            };

            let settings = RotationSettings::new(subject_names, &config.identity);
            let rotator = CertificateRotator::new(settings, signer, store);
            runtime.rotation = Some(rotator.spawn(shutdown));
            info!(
                source = "ca",
                provider = %config.identity.cert_provider,
                "Serving identity issued by certificate authority"
            );
        }
        IdentitySource::Absent => {
            info!(source = "absent", "No serving identity configured, TLS listeners disabled");
        }
    }

    Ok(runtime)
}
