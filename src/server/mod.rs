//! # Multiplexed Server
//!
//! Binds every configured listener and serves them from one set of shared
//! state:
//!
//! - `http`: HTTP/1.1 and h2c on one port; also carries ADS when no
//!   dedicated gRPC port is configured
//! - `monitoring`: Prometheus scrape and version
//! - `grpc`: cleartext ADS
//! - `secure_grpc`: ADS over TLS, client certificates verified when offered
//! - `https`: the HTTP router over TLS
//!
//! TLS listeners only open when an identity source exists. They take their
//! certificate from the bundle store on every handshake.

pub mod admission;
pub mod http;
pub mod rate_limit;
pub mod tls;

pub use admission::{AdmissionController, AdmissionRejected, SessionPermit};
pub use rate_limit::ConnectionRateLimiter;
pub use tls::{resolve_cipher_suites, TlsConfigSource, TlsListener};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use crate::config::{AdmissionConfig, Config, ServerOptions};
use crate::identity::{BundleStore, IdentityRuntime};
use crate::xds::{AggregatedDiscovery, XdsState};
use crate::{Error, Result};

/// Addresses actually bound, after resolving port 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundAddresses {
    pub http: Option<SocketAddr>,
    pub monitoring: Option<SocketAddr>,
    pub grpc: Option<SocketAddr>,
    pub secure_grpc: Option<SocketAddr>,
    pub https: Option<SocketAddr>,
}

/// Listener set built from configuration and the identity runtime.
pub struct MultiplexServer {
    options: ServerOptions,
    admission: AdmissionConfig,
    cipher_suites: Vec<String>,
    store: Arc<BundleStore>,
    serves_tls: bool,
    metrics: Option<PrometheusHandle>,
}

impl MultiplexServer {
    pub fn new(config: &Config, identity: &IdentityRuntime) -> Self {
        Self::from_parts(config, identity.store().clone(), identity.serves_tls())
    }

    /// Build from a bare store. `serves_tls` decides whether TLS listeners
    /// are opened at all.
    pub fn from_parts(config: &Config, store: Arc<BundleStore>, serves_tls: bool) -> Self {
        Self {
            options: config.server.clone(),
            admission: config.admission.clone(),
            cipher_suites: config.tls.cipher_suites.clone(),
            store,
            serves_tls,
            metrics: None,
        }
    }

    /// Prometheus handle rendered at `/metrics`.
    pub fn with_metrics(mut self, metrics: Option<PrometheusHandle>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bind all listeners and start serving.
    ///
    /// Every bind happens before this returns, so address conflicts and a
    /// bad cipher allow-list fail startup instead of a background task.
    pub async fn start(self) -> Result<ServerHandle> {
        let shutdown = CancellationToken::new();
        let discovery = AggregatedDiscovery::new(
            Arc::new(XdsState::new()),
            ConnectionRateLimiter::from_config(&self.admission),
            AdmissionController::new(self.admission.max_connections),
            shutdown.clone(),
        );

        let wants_tls = self.options.secure_grpc_addr.is_some() || self.options.https_addr.is_some();
        let tls = if self.serves_tls && wants_tls {
            Some(Arc::new(TlsConfigSource::new(self.store.clone(), &self.cipher_suites)?))
        } else {
            if wants_tls {
                info!("No identity source configured, TLS listeners will not be started");
            }
            None
        };

        let http_router = http::build_router(
            self.store.clone(),
            self.options.grpc_addr.is_none().then(|| discovery.clone().into_server()),
        );

        let mut addresses = BoundAddresses::default();
        let mut tasks = Vec::new();

        if let Some(addr) = self.options.grpc_addr {
            let listener = bind("grpc", addr).await?;
            addresses.grpc = Some(listener.local_addr()?);
            let incoming = TcpListenerStream::new(listener);
            let server = Server::builder()
                .add_service(discovery.clone().into_server())
                .serve_with_incoming_shutdown(incoming, cancelled(&shutdown));
            tasks.push(spawn_listener("grpc", async move {
                server.await.map_err(|e| Error::transport(format!("gRPC server error: {e}")))
            }));
        }

        if let (Some(addr), Some(tls)) = (self.options.secure_grpc_addr, tls.as_ref()) {
            let listener = bind("secure_grpc", addr).await?;
            let listener = TlsListener::spawn(listener, tls.clone(), "secure_grpc", shutdown.clone())?;
            addresses.secure_grpc = Some(listener.local_addr());
            let server = Server::builder()
                .add_service(discovery.clone().into_server())
                .serve_with_incoming_shutdown(listener.into_incoming(), cancelled(&shutdown));
            tasks.push(spawn_listener("secure_grpc", async move {
                server.await.map_err(|e| Error::transport(format!("Secure gRPC server error: {e}")))
            }));
        }

        if let Some(addr) = self.options.http_addr {
            let listener = bind("http", addr).await?;
            addresses.http = Some(listener.local_addr()?);
            tasks.push(serve_router("http", listener, http_router.clone(), &shutdown));
        }

        if let (Some(addr), Some(tls)) = (self.options.https_addr, tls.as_ref()) {
            let listener = bind("https", addr).await?;
            let listener = TlsListener::spawn(listener, tls.clone(), "https", shutdown.clone())?;
            addresses.https = Some(listener.local_addr());
            let router = http_router.clone();
            let signal = cancelled(&shutdown);
            tasks.push(spawn_listener("https", async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(signal)
                    .await
                    .map_err(|e| Error::transport(format!("HTTPS server error: {e}")))
            }));
        }

        if let Some(addr) = self.options.monitoring_addr {
            let listener = bind("monitoring", addr).await?;
            addresses.monitoring = Some(listener.local_addr()?);
            let router = http::build_monitoring_router(self.metrics.clone());
            tasks.push(serve_router("monitoring", listener, router, &shutdown));
        }

        info!(
            http = ?addresses.http,
            monitoring = ?addresses.monitoring,
            grpc = ?addresses.grpc,
            secure_grpc = ?addresses.secure_grpc,
            https = ?addresses.https,
            max_connections = self.admission.max_connections,
            "Multiplexed server started"
        );

        Ok(ServerHandle {
            addresses,
            discovery,
            tasks,
            shutdown,
            grace: self.options.shutdown_grace(),
        })
    }
}

/// Running listeners.
pub struct ServerHandle {
    addresses: BoundAddresses,
    discovery: AggregatedDiscovery,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
    shutdown: CancellationToken,
    grace: Duration,
}

impl ServerHandle {
    pub fn addresses(&self) -> BoundAddresses {
        self.addresses
    }

    pub fn admission(&self) -> &AdmissionController {
        self.discovery.admission()
    }

    /// Stop accepting, let sessions drain for the grace period, then abort
    /// whatever is still running.
    pub async fn shutdown(self) {
        info!(grace = ?self.grace, "Shutting down listeners");
        self.shutdown.cancel();

        let aborts: Vec<_> = self.tasks.iter().map(|(_, task)| task.abort_handle()).collect();
        let drain = futures::future::join_all(self.tasks.into_iter().map(|(name, task)| async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(listener = name, error = %err, "Listener exited with error"),
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!(listener = name, error = %err, "Listener task panicked"),
            }
        }));

        if tokio::time::timeout(self.grace, drain).await.is_err() {
            warn!(grace = ?self.grace, "Listeners did not drain in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Listeners stopped");
    }
}

async fn bind(name: &'static str, addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind {name} listener on {addr}: {e}")))
}

fn cancelled(token: &CancellationToken) -> impl Future<Output = ()> + Send + 'static {
    let token = token.clone();
    async move { token.cancelled().await }
}

fn spawn_listener<F>(name: &'static str, serve: F) -> (&'static str, JoinHandle<Result<()>>)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    (name, tokio::spawn(serve))
}

fn serve_router(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: &CancellationToken,
) -> (&'static str, JoinHandle<Result<()>>) {
    let signal = cancelled(shutdown);
    spawn_listener(name, async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| Error::transport(format!("{name} server error: {e}")))
    })
}
