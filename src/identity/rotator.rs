//! Keeps a CA-issued leaf certificate fresh.
//!
//! The rotator asks a [`CertificateSigner`] for a certificate covering the
//! resolved SAN set, publishes the result into the [`BundleStore`] and then
//! sleeps until a configured fraction of the new certificate's validity has
//! elapsed. Failed requests back off exponentially. When the attempt budget
//! runs out the cycle is abandoned: the last bundle stays in place, the
//! failure is reported, and the next cycle starts after a cooldown.
//!
//! Authorities backdate `not_before` to absorb clock skew, so the renewal
//! window of a leaf this rotator received is measured from the moment it
//! arrived. Scheduled cycles are also spaced by a minimum interval.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bundle::{CertificateBundle, PemOrigins};
use super::signer::{CertificateSigner, RetryConfig, SigningRequest};
use super::store::{BundleStore, PublishOutcome};
use crate::config::IdentityConfig;
use crate::errors::SigningError;
use crate::observability::MetricsRecorder;
use crate::{Error, Result};

/// Deadline applied to every signing request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait after an abandoned cycle before trying again.
pub const DEFAULT_ABANDON_COOLDOWN: Duration = Duration::from_secs(300);
/// Shortest gap between the end of one scheduled cycle and the next.
pub const DEFAULT_MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub subject_names: Vec<String>,
    pub signer_name: String,
    pub lifetime: Duration,
    /// Fraction of the validity window after which renewal starts
    pub rotation_fraction: f64,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub abandon_cooldown: Duration,
    /// Floor on the delay between scheduled cycles; `rotate_now` ignores it
    pub min_renewal_interval: Duration,
}

impl RotationSettings {
    pub fn new(subject_names: Vec<String>, identity: &IdentityConfig) -> Self {
        Self {
            subject_names,
            signer_name: identity.signer_name.clone(),
            lifetime: identity.cert_lifetime(),
            rotation_fraction: identity.rotation_fraction,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryConfig::signing(),
            abandon_cooldown: DEFAULT_ABANDON_COOLDOWN,
            min_renewal_interval: DEFAULT_MIN_RENEWAL_INTERVAL,
        }
    }
}

/// Where the rotation loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    NoIdentity,
    Requesting,
    /// Waiting before attempt number `attempt` (0-indexed)
    RetryBackoff { attempt: u32 },
    Issued,
    /// Attempts exhausted; the previous bundle, if any, is still served
    Abandoned,
}

/// The last bundle this rotator obtained and when it arrived.
#[derive(Debug, Clone)]
struct Receipt {
    fingerprint: String,
    received_at: DateTime<Utc>,
}

enum CycleOutcome {
    Issued(PublishOutcome),
    Abandoned(SigningError),
    Cancelled,
}

pub struct CertificateRotator {
    settings: RotationSettings,
    signer: Arc<dyn CertificateSigner>,
    store: Arc<BundleStore>,
    trigger: Arc<watch::Sender<u64>>,
    state: watch::Sender<RotationState>,
    receipt: Mutex<Option<Receipt>>,
    metrics: MetricsRecorder,
}

impl CertificateRotator {
    pub fn new(
        settings: RotationSettings,
        signer: Arc<dyn CertificateSigner>,
        store: Arc<BundleStore>,
    ) -> Self {
        let (state, _) = watch::channel(RotationState::NoIdentity);
        let (trigger, _) = watch::channel(0);
        Self {
            settings,
            signer,
            store,
            trigger: Arc::new(trigger),
            state,
            receipt: Mutex::new(None),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Run one renewal cycle, including retries.
    pub async fn rotate_once(&self) -> Result<PublishOutcome> {
        match self.rotate_with_retry(&CancellationToken::new()).await {
            CycleOutcome::Issued(outcome) => Ok(outcome),
            CycleOutcome::Abandoned(err) => Err(err.into()),
            CycleOutcome::Cancelled => Err(Error::internal("certificate rotation cancelled")),
        }
    }

    /// Time to wait before the next renewal given the served bundle.
    ///
    /// A bundle this rotator received is renewed once `rotation_fraction` of
    /// the time between its arrival and `not_after` has passed. Any other
    /// bundle is measured from its `not_before`.
    pub fn next_rotation_delay(&self, now: DateTime<Utc>) -> Duration {
        let Ok(bundle) = self.store.current() else {
            return Duration::ZERO;
        };
        let info = bundle.info();
        if info.is_expired_at(now) {
            return Duration::ZERO;
        }

        let start = self
            .received_at(bundle.fingerprint())
            .unwrap_or(info.not_before);
        (info.renewal_time_from(start, self.settings.rotation_fraction) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Start the background loop. It stops when `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> RotationHandle {
        let trigger = self.trigger.clone();
        let triggers = self.trigger.subscribe();
        let state = self.state.subscribe();
        let task = tokio::spawn(async move { self.run(triggers, shutdown).await });
        RotationHandle { trigger, state, task }
    }

    async fn run(self, mut triggers: watch::Receiver<u64>, shutdown: CancellationToken) {
        info!(
            signer = %self.signer.name(),
            subjects = ?self.settings.subject_names,
            lifetime_secs = self.settings.lifetime.as_secs(),
            "Certificate rotation started"
        );

        let mut last_cycle: Option<Instant> = None;
        let mut requested = false;

        loop {
            let mut delay = Duration::ZERO;
            if !requested {
                delay = self.next_rotation_delay(Utc::now());
                if let Some(finished) = last_cycle {
                    let interval = self.settings.min_renewal_interval;
                    delay = delay.max(interval.saturating_sub(finished.elapsed()));
                }
            }
            if !delay.is_zero() {
                debug!(delay_secs = delay.as_secs(), "Next certificate rotation scheduled");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                    Ok(()) = triggers.changed() => info!("Immediate certificate rotation requested"),
                }
            }
            requested = false;

            let outcome = self.rotate_with_retry(&shutdown).await;
            // A request made while a cycle ran is satisfied by that cycle.
            triggers.mark_unchanged();
            last_cycle = Some(Instant::now());

            match outcome {
                CycleOutcome::Issued(_) => {}
                CycleOutcome::Cancelled => break,
                CycleOutcome::Abandoned(err) => {
                    self.set_state(RotationState::Abandoned);
                    self.metrics.record_rotation_abandoned();
                    error!(
                        signer = %self.signer.name(),
                        attempts = self.settings.retry.max_attempts,
                        error = %err,
                        serving_stale = self.store.is_ready(),
                        "Certificate rotation abandoned, keeping current identity"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.abandon_cooldown) => {}
                        Ok(()) = triggers.changed() => {
                            info!("Immediate certificate rotation requested");
                            requested = true;
                        }
                    }
                }
            }
        }

        debug!("Certificate rotation stopped");
    }

    async fn rotate_with_retry(&self, shutdown: &CancellationToken) -> CycleOutcome {
        let retry = &self.settings.retry;
        let mut last_error = None;

        for attempt in 0..retry.max_attempts {
            let backoff = retry.backoff_for_attempt(attempt);
            if !backoff.is_zero() {
                self.set_state(RotationState::RetryBackoff { attempt });
                tokio::select! {
                    _ = shutdown.cancelled() => return CycleOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            self.set_state(RotationState::Requesting);
            let result = tokio::select! {
                _ = shutdown.cancelled() => return CycleOutcome::Cancelled,
                result = self.request_bundle() => result,
            };

            match result {
                Ok(bundle) => {
                    self.metrics.record_rotation_attempt("issued");
                    let not_after = bundle.info().not_after;
                    self.record_receipt(bundle.fingerprint());
                    let outcome = self.store.publish(bundle);
                    if outcome == PublishOutcome::Published {
                        self.metrics.record_identity_published("ca", not_after.timestamp());
                    }
                    self.set_state(RotationState::Issued);
                    info!(signer = %self.signer.name(), %not_after, attempt = attempt + 1, "Certificate issued");
                    return CycleOutcome::Issued(outcome);
                }
                Err(err) => {
                    self.metrics.record_rotation_attempt("failed");
                    warn!(
                        signer = %self.signer.name(),
                        attempt = attempt + 1,
                        max_attempts = retry.max_attempts,
                        error = %err,
                        "Certificate signing failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        CycleOutcome::Abandoned(
            last_error.unwrap_or_else(|| SigningError::Unavailable("no attempts allowed".into())),
        )
    }

    /// Generate a fresh key, get it signed and assemble the bundle.
    async fn request_bundle(&self) -> std::result::Result<CertificateBundle, SigningError> {
        let pending = SigningRequest::generate(
            &self.settings.subject_names,
            &self.settings.signer_name,
            self.settings.lifetime,
        )?;

        let timeout = self.settings.request_timeout;
        let signed = tokio::time::timeout(timeout, self.signer.sign(pending.request))
            .await
            .map_err(|_| SigningError::Timeout(timeout))??;

        let bundle = CertificateBundle::from_pem_with_origins(
            signed.certificate_chain_pem.as_bytes(),
            pending.private_key_pem.as_bytes(),
            signed.trust_anchor_pem.as_bytes(),
            PemOrigins {
                certificate: "issued certificate",
                private_key: "generated private key",
                trust_anchor: "authority trust anchor",
            },
        )
        .map_err(|e| SigningError::InvalidResponse(e.to_string()))?;

        if bundle.info().is_expired_at(Utc::now()) {
            return Err(SigningError::InvalidResponse(format!(
                "issued certificate already expired at {}",
                bundle.info().not_after
            )));
        }
        Ok(bundle)
    }

    fn record_receipt(&self, fingerprint: &str) {
        let receipt = Receipt { fingerprint: fingerprint.to_string(), received_at: Utc::now() };
        *self.receipt.lock().expect("rotation receipt lock poisoned") = Some(receipt);
    }

    fn received_at(&self, fingerprint: &str) -> Option<DateTime<Utc>> {
        self.receipt
            .lock()
            .expect("rotation receipt lock poisoned")
            .as_ref()
            .filter(|receipt| receipt.fingerprint == fingerprint)
            .map(|receipt| receipt.received_at)
    }

    fn set_state(&self, state: RotationState) {
        self.state.send_replace(state);
    }
}

/// Control surface for a running rotator.
#[derive(Debug)]
pub struct RotationHandle {
    trigger: Arc<watch::Sender<u64>>,
    state: watch::Receiver<RotationState>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Skip the schedule and renew now. Requests made while a cycle is
    /// running fold into that cycle.
    pub fn rotate_now(&self) {
        self.trigger.send_modify(|requests| *requests = requests.wrapping_add(1));
    }

    pub fn state(&self) -> RotationState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RotationState> {
        self.state.clone()
    }

    /// Wait for the loop to exit after shutdown was signalled.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(error = %err, "Certificate rotation task failed");
        }
    }
}
