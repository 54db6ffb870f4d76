//! TLS termination backed by the live bundle store.
//!
//! Every handshake reads the store, so a rotated bundle is served by the
//! next connection without rebinding anything. `ServerConfig`s are cached
//! per bundle fingerprint; the cache only saves rebuilding the client
//! verifier and never outlives a publish.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::serve::Listener;
use rustls::crypto::CryptoProvider;
use rustls::server::{Acceptor, ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig, SupportedCipherSuite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::TlsError;
use crate::identity::{BundleStore, CertificateBundle};
use crate::observability::MetricsRecorder;
use crate::{Error, Result};

/// Upper bound on a single handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Map IANA cipher suite names onto the ring provider's suites.
pub fn resolve_cipher_suites(names: &[String]) -> std::result::Result<Vec<SupportedCipherSuite>, TlsError> {
    use rustls::crypto::ring::cipher_suite;

    let known: &[(&str, SupportedCipherSuite)] = &[
        ("TLS_AES_256_GCM_SHA384", cipher_suite::TLS13_AES_256_GCM_SHA384),
        ("TLS_AES_128_GCM_SHA256", cipher_suite::TLS13_AES_128_GCM_SHA256),
        ("TLS_CHACHA20_POLY1305_SHA256", cipher_suite::TLS13_CHACHA20_POLY1305_SHA256),
        (
            "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        ),
        (
            "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
            cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        ),
        (
            "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
            cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        ),
        (
            "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        ),
        (
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ),
        (
            "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
            cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        ),
    ];

    let mut suites = Vec::with_capacity(names.len());
    for name in names {
        let normalized = name.trim().to_uppercase().replace('-', "_");
        match known.iter().find(|(known_name, _)| *known_name == normalized) {
            Some((_, suite)) => suites.push(*suite),
            None => {
                let available: Vec<&str> = known.iter().map(|(n, _)| *n).collect();
                return Err(TlsError::UnknownCipherSuite {
                    name: name.clone(),
                    available: available.join(", "),
                });
            }
        }
    }
    Ok(suites)
}

/// Hands the bundle's prepared key to rustls.
#[derive(Debug)]
struct BundleCertResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for BundleCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}

/// Produces the `ServerConfig` for the bundle currently in the store.
pub struct TlsConfigSource {
    store: Arc<BundleStore>,
    provider: Arc<CryptoProvider>,
    cached: Mutex<Option<(String, Arc<ServerConfig>)>>,
}

impl std::fmt::Debug for TlsConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfigSource")
            .field("cipher_suites", &self.provider.cipher_suites)
            .finish_non_exhaustive()
    }
}

impl TlsConfigSource {
    /// An empty `cipher_suites` keeps the provider defaults; otherwise only
    /// the listed suites are negotiated.
    pub fn new(store: Arc<BundleStore>, cipher_suites: &[String]) -> std::result::Result<Self, TlsError> {
        let provider = if cipher_suites.is_empty() {
            rustls::crypto::ring::default_provider()
        } else {
            let suites = resolve_cipher_suites(cipher_suites)?;
            info!(cipher_suites = ?cipher_suites, count = suites.len(), "TLS cipher suite allow-list configured");
            CryptoProvider { cipher_suites: suites, ..rustls::crypto::ring::default_provider() }
        };

        // Reject allow-lists that leave no usable protocol version.
        ServerConfig::builder_with_provider(Arc::new(provider.clone()))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::ServerConfig(e.to_string()))?;

        Ok(Self { store, provider: Arc::new(provider), cached: Mutex::new(None) })
    }

    /// Config for the bundle being served right now.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let bundle = self.store.current()?;

        let mut cached = self.cached.lock().expect("tls config cache poisoned");
        if let Some((fingerprint, config)) = cached.as_ref() {
            if fingerprint == bundle.fingerprint() {
                return Ok(config.clone());
            }
        }

        let config = Arc::new(self.build(&bundle)?);
        *cached = Some((bundle.fingerprint().to_string(), config.clone()));
        debug!(fingerprint = %bundle.fingerprint(), "Built TLS server configuration");
        Ok(config)
    }

    fn build(&self, bundle: &CertificateBundle) -> std::result::Result<ServerConfig, TlsError> {
        let mut roots = RootCertStore::empty();
        for anchor in bundle.trust_anchors() {
            roots
                .add(anchor.clone())
                .map_err(|e| TlsError::ServerConfig(format!("invalid trust anchor: {e}")))?;
        }

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), self.provider.clone())
            .allow_unauthenticated()
            .build()
            .map_err(|e| TlsError::ServerConfig(format!("failed to build client verifier: {e}")))?;

        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::ServerConfig(e.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_cert_resolver(Arc::new(BundleCertResolver(bundle.certified_key().clone())));
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

/// Complete one server handshake using the live bundle.
pub async fn accept(stream: TcpStream, configs: &TlsConfigSource) -> Result<TlsStream<TcpStream>> {
    let handshake = async {
        let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;
        let config = configs.server_config()?;
        Ok::<_, Error>(start.into_stream(config).await?)
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| Error::transport(format!("TLS handshake timed out after {HANDSHAKE_TIMEOUT:?}")))?
}

/// Accepted TLS connections from a background accept loop.
///
/// Usable as an axum [`Listener`] or, through [`TlsListener::into_incoming`],
/// as a tonic incoming stream.
pub struct TlsListener {
    connections: mpsc::Receiver<(TlsStream<TcpStream>, SocketAddr)>,
    local_addr: SocketAddr,
}

impl TlsListener {
    /// Start accepting on `listener`. Each handshake runs on its own task so
    /// a slow client cannot stall others. The loop ends on `shutdown`.
    pub fn spawn(
        listener: TcpListener,
        configs: Arc<TlsConfigSource>,
        name: &'static str,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(64);
        let metrics = MetricsRecorder::new();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) if is_connection_error(&err) => continue,
                    Err(err) => {
                        error!(listener = name, "TLS accept error: {err}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let configs = configs.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match accept(stream, &configs).await {
                        Ok(tls) => {
                            let _ = tx.send((tls, addr)).await;
                        }
                        Err(err) => {
                            metrics.record_handshake_failure(name);
                            warn!(listener = name, %addr, error = %err, "TLS handshake failed");
                        }
                    }
                });
            }
            debug!(listener = name, "TLS accept loop stopped");
        });

        Ok(Self { connections: rx, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stream of established connections for `serve_with_incoming`.
    pub fn into_incoming(
        self,
    ) -> impl Stream<Item = std::io::Result<TlsStream<TcpStream>>> + Send + 'static {
        ReceiverStream::new(self.connections).map(|(stream, _)| Ok(stream))
    }
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.connections.recv().await {
            Some(connection) => connection,
            // Accept loop is gone; axum is being shut down.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

pub(crate) fn is_connection_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
