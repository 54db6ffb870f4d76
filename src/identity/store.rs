//! The single source of truth for the serving identity.
//!
//! Producers (file loader, CA rotator) call [`BundleStore::publish`]; the
//! TLS listeners call [`BundleStore::current`] on every handshake. Publishes
//! are serialized and replace the whole bundle, so a reader sees either the
//! previous bundle or the new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tracing::{debug, info};

use super::bundle::CertificateBundle;
use crate::{Error, Result};

/// Identifier returned by [`BundleStore::subscribe`].
pub type SubscriptionId = u64;

type Watcher = Arc<dyn Fn(&Arc<CertificateBundle>, &str) + Send + Sync>;

/// Result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The bundle replaced the previous one and watchers were notified.
    Published,
    /// Same fingerprint as the current bundle; nothing changed.
    Unchanged,
}

pub struct BundleStore {
    current: RwLock<Option<Arc<CertificateBundle>>>,
    publish_lock: Mutex<()>,
    watchers: RwLock<Vec<(SubscriptionId, Watcher)>>,
    next_subscription: AtomicU64,
    updates: watch::Sender<Option<Arc<CertificateBundle>>>,
}

impl Default for BundleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BundleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleStore").field("current", &self.snapshot()).finish_non_exhaustive()
    }
}

impl BundleStore {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            current: RwLock::new(None),
            publish_lock: Mutex::new(()),
            watchers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            updates,
        }
    }

    /// Replace the held bundle and notify watchers.
    ///
    /// Watchers run synchronously on the publishing task while the publish
    /// lock is held; they must not publish themselves.
    pub fn publish(&self, bundle: CertificateBundle) -> PublishOutcome {
        let _serialized = self.publish_lock.lock().expect("bundle publish lock poisoned");

        if let Some(existing) = self.snapshot() {
            if existing.fingerprint() == bundle.fingerprint() {
                debug!(fingerprint = %bundle.fingerprint(), "Identity unchanged, skipping publish");
                return PublishOutcome::Unchanged;
            }
        }

        let bundle = Arc::new(bundle);
        {
            let mut current = self.current.write().expect("bundle store lock poisoned");
            *current = Some(bundle.clone());
        }
        self.updates.send_replace(Some(bundle.clone()));

        info!(
            subject = %bundle.info().subject,
            not_after = %bundle.info().not_after,
            fingerprint = %bundle.fingerprint(),
            "Published serving identity"
        );

        let watchers: Vec<Watcher> = self
            .watchers
            .read()
            .expect("bundle watcher lock poisoned")
            .iter()
            .map(|(_, watcher)| watcher.clone())
            .collect();
        for watcher in watchers {
            watcher(&bundle, bundle.fingerprint());
        }

        PublishOutcome::Published
    }

    /// The bundle to serve right now.
    pub fn current(&self) -> Result<Arc<CertificateBundle>> {
        self.snapshot().ok_or(Error::IdentityNotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Register a callback invoked after every effective publish.
    pub fn subscribe<F>(&self, watcher: F) -> SubscriptionId
    where
        F: Fn(&Arc<CertificateBundle>, &str) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.watchers.write().expect("bundle watcher lock poisoned").push((id, Arc::new(watcher)));
        id
    }

    /// Remove a callback. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut watchers = self.watchers.write().expect("bundle watcher lock poisoned");
        let before = watchers.len();
        watchers.retain(|(existing, _)| *existing != id);
        watchers.len() != before
    }

    /// Async view of the current bundle for consumers that await changes.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<CertificateBundle>>> {
        self.updates.subscribe()
    }

    fn snapshot(&self) -> Option<Arc<CertificateBundle>> {
        self.current.read().expect("bundle store lock poisoned").clone()
    }
}
