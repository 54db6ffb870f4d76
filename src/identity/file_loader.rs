//! Static identities read from PEM files and reloaded when they change.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bundle::{CertificateBundle, PemOrigins};
use super::signer::RetryConfig;
use super::store::{BundleStore, PublishOutcome};
use crate::config::TlsOptions;
use crate::errors::TlsError;
use crate::observability::MetricsRecorder;
use crate::Result;

/// Window over which bursts of file events collapse into one reload.
const EVENT_COALESCE: Duration = Duration::from_millis(100);

/// Locations of the certificate chain, private key and trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl CertificatePaths {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>, ca: impl Into<PathBuf>) -> Self {
        Self { cert: cert.into(), key: key.into(), ca: ca.into() }
    }

    /// Explicitly configured paths, if all three were given.
    pub fn from_options(options: &TlsOptions) -> Option<Self> {
        match (&options.cert_file, &options.key_file, &options.ca_cert_file) {
            (Some(cert), Some(key), Some(ca)) => Some(Self::new(cert, key, ca)),
            _ => None,
        }
    }

    /// Mounted identity under `cert_dir`, if one is present.
    ///
    /// Looks for `tls/tls.crt` and `tls/tls.key`, with the CA at
    /// `tls/ca.crt` or, failing that, `ca/root-cert.pem`.
    pub fn well_known(cert_dir: &Path) -> Option<Self> {
        let tls_dir = cert_dir.join("tls");
        let cert = tls_dir.join("tls.crt");
        let key = tls_dir.join("tls.key");
        if !cert.is_file() || !key.is_file() {
            return None;
        }

        [tls_dir.join("ca.crt"), cert_dir.join("ca").join("root-cert.pem")]
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map(|ca| Self { cert, key, ca })
    }

    pub fn all_exist(&self) -> bool {
        self.cert.is_file() && self.key.is_file() && self.ca.is_file()
    }

    /// Directories that need a watch.
    fn parent_dirs(&self) -> BTreeSet<PathBuf> {
        [&self.cert, &self.key, &self.ca]
            .into_iter()
            .map(|path| match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            })
            .collect()
    }
}

/// Drives the bundle store from a [`CertificatePaths`] triple.
pub struct FileCertificateLoader {
    paths: CertificatePaths,
    store: Arc<BundleStore>,
    poll_interval: Duration,
    retry: RetryConfig,
    metrics: MetricsRecorder,
}

impl FileCertificateLoader {
    pub fn new(paths: CertificatePaths, store: Arc<BundleStore>, poll_interval: Duration) -> Self {
        Self {
            paths,
            store,
            poll_interval,
            retry: RetryConfig::file_reload(),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn paths(&self) -> &CertificatePaths {
        &self.paths
    }

    /// Read and validate all three files into a bundle.
    pub async fn read_bundle(&self) -> std::result::Result<CertificateBundle, TlsError> {
        let cert_pem = tokio::fs::read(&self.paths.cert).await.map_err(|source| {
            TlsError::CertificateReadError { path: self.paths.cert.clone(), source }
        })?;
        let key_pem = tokio::fs::read(&self.paths.key).await.map_err(|source| {
            TlsError::PrivateKeyReadError { path: self.paths.key.clone(), source }
        })?;
        let ca_pem = tokio::fs::read(&self.paths.ca).await.map_err(|source| {
            TlsError::TrustAnchorReadError { path: self.paths.ca.clone(), source }
        })?;

        let cert_origin = self.paths.cert.display().to_string();
        let key_origin = self.paths.key.display().to_string();
        let ca_origin = self.paths.ca.display().to_string();
        let bundle = CertificateBundle::from_pem_with_origins(
            &cert_pem,
            &key_pem,
            &ca_pem,
            PemOrigins {
                certificate: &cert_origin,
                private_key: &key_origin,
                trust_anchor: &ca_origin,
            },
        )?;
        bundle.check_validity(&self.paths.cert, Utc::now())?;
        Ok(bundle)
    }

    /// Load and publish the files once. Any failure is fatal to startup.
    pub async fn load_initial(&self) -> Result<PublishOutcome> {
        let bundle = self.read_bundle().await?;
        info!(
            cert = %self.paths.cert.display(),
            key = %self.paths.key.display(),
            ca = %self.paths.ca.display(),
            "Loaded serving identity from files"
        );
        Ok(self.publish(bundle))
    }

    /// Watch the containing directories and reload on change until
    /// `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let (watcher, events) = match self.start_watch() {
            Ok((watcher, events)) => (Some(watcher), Some(events)),
            Err(err) => {
                warn!(error = %err, "File watch unavailable, relying on polling");
                (None, None)
            }
        };

        tokio::spawn(async move {
            // Dropping the watcher on exit tears the inotify handles down.
            let _watcher = watcher;
            self.run(events, shutdown).await;
        })
    }

    fn start_watch(
        &self,
    ) -> notify::Result<(RecommendedWatcher, UnboundedReceiver<notify::Result<Event>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;

        for dir in self.paths.parent_dirs() {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            debug!(dir = %dir.display(), "Watching identity directory");
        }
        Ok((watcher, rx))
    }

    async fn run(
        &self,
        mut events: Option<UnboundedReceiver<notify::Result<Event>>>,
        shutdown: CancellationToken,
    ) {
        let mut poll = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Identity file watch stopped");
                    return;
                }
                event = next_event(&mut events) => match event {
                    Some(Ok(event)) if is_content_change(&event) => {
                        drain_burst(&mut events).await;
                        self.reload().await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => warn!(error = %err, "File watch error"),
                    None => {
                        warn!("File watch channel closed, relying on polling");
                        events = None;
                    }
                },
                _ = poll.tick() => {
                    self.reload().await;
                }
            }
        }
    }

    /// Re-read the files, retrying while they are mid-write. Returns true
    /// when a new bundle was published.
    async fn reload(&self) -> bool {
        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            let delay = self.retry.backoff_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.read_bundle().await {
                Ok(bundle) => return self.publish(bundle) == PublishOutcome::Published,
                Err(err) => {
                    debug!(attempt, error = %err, "Identity files not readable yet");
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error {
            warn!(
                attempts = self.retry.max_attempts,
                error = %err,
                "Identity reload failed, keeping last good bundle"
            );
            self.metrics.record_file_reload_failure();
        }
        false
    }

    fn publish(&self, bundle: CertificateBundle) -> PublishOutcome {
        let not_after = bundle.info().not_after.timestamp();
        let outcome = self.store.publish(bundle);
        if outcome == PublishOutcome::Published {
            self.metrics.record_identity_published("files", not_after);
        }
        outcome
    }
}

async fn next_event(
    events: &mut Option<UnboundedReceiver<notify::Result<Event>>>,
) -> Option<notify::Result<Event>> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn drain_burst(events: &mut Option<UnboundedReceiver<notify::Result<Event>>>) {
    tokio::time::sleep(EVENT_COALESCE).await;
    if let Some(rx) = events {
        while rx.try_recv().is_ok() {}
    }
}

fn is_content_change(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_))
}
