//! Per-stream ACK/NACK bookkeeping for aggregated discovery.
//!
//! Every response carries a fresh nonce. The agent echoes the nonce of the
//! last response it processed; a request carrying the outstanding nonce is
//! an ACK (or a NACK when it carries `error_detail`), a request with an
//! older nonce is stale and dropped, and a request with no nonce asks for
//! the current state of its type.

use std::collections::HashMap;

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFirstRequest,
    /// Outstanding nonce per type URL
    AwaitingAck { pending: HashMap<String, String> },
}

/// What the stream should do with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestDisposition {
    Respond(DiscoveryResponse),
    Ack { type_url: String, version_info: String },
    Nack { type_url: String, nonce: String, message: String },
    Stale { type_url: String, nonce: String },
}

#[derive(Debug)]
pub struct DiscoverySession {
    id: Uuid,
    node_id: Option<String>,
    state: SessionState,
}

impl Default for DiscoverySession {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoverySession {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4(), node_id: None, state: SessionState::AwaitingFirstRequest }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Advance the session with one request. `version_info` is the version
    /// stamped on any response produced.
    pub fn handle(&mut self, request: &DiscoveryRequest, version_info: &str) -> RequestDisposition {
        if self.node_id.is_none() {
            self.node_id = request.node.as_ref().map(|node| node.id.clone());
        }

        let type_url = request.type_url.as_str();
        let nonce = request.response_nonce.as_str();

        let outstanding = match &self.state {
            SessionState::AwaitingFirstRequest => None,
            SessionState::AwaitingAck { pending } => pending.get(type_url).cloned(),
        };

        match outstanding {
            // Nothing sent for this type yet, or the agent starts over
            // (including a reconnect presenting a nonce from an old stream).
            None => self.respond(request, version_info),
            Some(_) if nonce.is_empty() => self.respond(request, version_info),
            Some(expected) if expected != nonce => RequestDisposition::Stale {
                type_url: type_url.to_string(),
                nonce: nonce.to_string(),
            },
            Some(_) => match &request.error_detail {
                Some(status) => RequestDisposition::Nack {
                    type_url: type_url.to_string(),
                    nonce: nonce.to_string(),
                    message: status.message.clone(),
                },
                None => RequestDisposition::Ack {
                    type_url: type_url.to_string(),
                    version_info: request.version_info.clone(),
                },
            },
        }
    }

    fn respond(&mut self, request: &DiscoveryRequest, version_info: &str) -> RequestDisposition {
        let nonce = Uuid::new_v4().to_string();

        match &mut self.state {
            SessionState::AwaitingAck { pending } => {
                pending.insert(request.type_url.clone(), nonce.clone());
            }
            state @ SessionState::AwaitingFirstRequest => {
                *state = SessionState::AwaitingAck {
                    pending: HashMap::from([(request.type_url.clone(), nonce.clone())]),
                };
            }
        }

        RequestDisposition::Respond(DiscoveryResponse {
            version_info: version_info.to_string(),
            resources: Vec::new(),
            canary: false,
            type_url: request.type_url.clone(),
            nonce,
            control_plane: None,
            resource_errors: Vec::new(),
        })
    }
}
