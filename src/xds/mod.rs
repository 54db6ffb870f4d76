//! Envoy aggregated discovery service.
//!
//! Accepts `StreamAggregatedResources` sessions behind the connection rate
//! limiter and the admission controller, and runs the per-session
//! ACK/NACK exchange. Resource computation is not part of this layer:
//! responses carry the current version and a nonce but no resources.

pub mod session;

pub use session::{DiscoverySession, RequestDisposition, SessionState};

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    },
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn, Instrument};

use crate::server::admission::{AdmissionController, SessionPermit};
use crate::server::rate_limit::ConnectionRateLimiter;

/// gRPC path prefix of the aggregated discovery service.
pub const ADS_SERVICE_PATH: &str = "/envoy.service.discovery.v3.AggregatedDiscoveryService";

/// Shared discovery state.
#[derive(Debug)]
pub struct XdsState {
    version: AtomicU64,
}

impl Default for XdsState {
    fn default() -> Self {
        Self::new()
    }
}

impl XdsState {
    pub fn new() -> Self {
        Self { version: AtomicU64::new(1) }
    }

    pub fn get_version(&self) -> String {
        self.version.load(Ordering::Relaxed).to_string()
    }

    pub fn increment_version(&self) {
        self.version.fetch_add(1, Ordering::Relaxed);
    }
}

/// ADS implementation shared by every listener that serves discovery.
#[derive(Debug, Clone)]
pub struct AggregatedDiscovery {
    state: Arc<XdsState>,
    limiter: ConnectionRateLimiter,
    admission: AdmissionController,
    shutdown: CancellationToken,
}

impl AggregatedDiscovery {
    pub fn new(
        state: Arc<XdsState>,
        limiter: ConnectionRateLimiter,
        admission: AdmissionController,
        shutdown: CancellationToken,
    ) -> Self {
        Self { state, limiter, admission, shutdown }
    }

    pub fn into_server(self) -> AggregatedDiscoveryServiceServer<Self> {
        AggregatedDiscoveryServiceServer::new(self)
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscovery {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let peer = request.remote_addr();
        self.limiter.acquire().await;
        let permit = self
            .admission
            .try_acquire()
            .map_err(|rejected| Status::resource_exhausted(rejected.to_string()))?;

        let session = DiscoverySession::new();
        let span = crate::xds_span!("stream_aggregated_resources", session.id());
        info!(parent: &span, peer = ?peer, active = self.admission.active(), "ADS stream established");

        let (tx, rx) = mpsc::channel(100);
        let stream = request.into_inner();
        tokio::spawn(
            run_session(session, stream, tx, self.state.clone(), permit, self.shutdown.clone())
                .instrument(span),
        );

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as Self::StreamAggregatedResourcesStream))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("incremental ADS is not supported"))
    }
}

async fn run_session(
    mut session: DiscoverySession,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
    tx: mpsc::Sender<std::result::Result<DiscoveryResponse, Status>>,
    state: Arc<XdsState>,
    _permit: SessionPermit,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            result = in_stream.next() => match result {
                Some(Ok(request)) => {
                    let had_node = session.node_id().is_some();
                    let disposition = session.handle(&request, &state.get_version());
                    if !had_node {
                        if let Some(node_id) = session.node_id() {
                            tracing::Span::current().record("node_id", node_id);
                        }
                    }

                    match disposition {
                        RequestDisposition::Respond(response) => {
                            debug!(
                                type_url = %response.type_url,
                                version = %response.version_info,
                                nonce = %response.nonce,
                                "Sending discovery response"
                            );
                            if tx.send(Ok(response)).await.is_err() {
                                break;
                            }
                        }
                        RequestDisposition::Ack { type_url, version_info } => {
                            debug!(%type_url, %version_info, "ACK");
                        }
                        RequestDisposition::Nack { type_url, nonce, message } => {
                            warn!(%type_url, %nonce, error = %message, "NACK");
                        }
                        RequestDisposition::Stale { type_url, nonce } => {
                            debug!(%type_url, %nonce, "Ignoring request with stale nonce");
                        }
                    }
                }
                Some(Err(status)) => {
                    debug!(error = %status, "ADS stream receive error");
                    break;
                }
                None => break,
            },
            _ = tx.closed() => break,
            _ = shutdown.cancelled() => {
                let _ = tx.send(Err(Status::unavailable("server shutting down"))).await;
                break;
            }
        }
    }

    info!("ADS stream closed");
}
