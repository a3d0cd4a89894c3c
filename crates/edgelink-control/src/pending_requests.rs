//! Pending requests tracker (correlation table)
//!
//! Tracks HTTP requests forwarded through the tunnel and routes each reply back
//! to the waiting ingress call. An entry is removed exactly once, either by the
//! reply, by a timeout, or by the caller going away; whichever comes later
//! finds nothing and is a no-op.

use dashmap::DashMap;
use edgelink_proto::ForwardedHttpResponse;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

struct PendingCall {
    /// Tenant the request was sent to; only its agents may answer
    tenant: String,
    tx: oneshot::Sender<ForwardedHttpResponse>,
}

/// Outcome of delivering a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the reply
    Delivered,
    /// No pending call with this id (already resolved, timed out, or never existed)
    Unknown,
    /// The pending call belongs to another tenant; left untouched
    WrongTenant,
    /// The call was removed but its caller had already gone away
    CallerGone,
}

/// Tracks pending HTTP requests awaiting responses
#[derive(Clone, Default)]
pub struct PendingRequests {
    /// Maps correlation id -> oneshot sender for the response
    requests: Arc<DashMap<Uuid, PendingCall>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request
    /// Returns a receiver that will receive the response
    pub fn register(&self, id: Uuid, tenant: &str) -> oneshot::Receiver<ForwardedHttpResponse> {
        let (tx, rx) = oneshot::channel();
        let previous = self.requests.insert(
            id,
            PendingCall {
                tenant: tenant.to_string(),
                tx,
            },
        );
        if previous.is_some() {
            warn!(correlation_id = %id, "Replaced an existing pending request with the same id");
        }
        debug!(correlation_id = %id, tenant = %tenant, "Registered pending request");
        rx
    }

    /// Send a response for a pending request answered by an agent of `tenant`
    pub fn respond(
        &self,
        id: Uuid,
        tenant: &str,
        response: ForwardedHttpResponse,
    ) -> Resolution {
        if let Some((_, call)) = self.requests.remove_if(&id, |_, call| call.tenant == tenant) {
            debug!(correlation_id = %id, "Routing response");
            if call.tx.send(response).is_err() {
                debug!(correlation_id = %id, "Caller dropped before the response arrived");
                return Resolution::CallerGone;
            }
            return Resolution::Delivered;
        }

        if self.requests.contains_key(&id) {
            warn!(
                correlation_id = %id,
                tenant = %tenant,
                "Ignoring response from an agent of a different tenant"
            );
            return Resolution::WrongTenant;
        }

        debug!(correlation_id = %id, "No pending request found; discarding late reply");
        Resolution::Unknown
    }

    /// Cancel a pending request (e.g., on timeout or error)
    pub fn cancel(&self, id: Uuid) -> bool {
        if self.requests.remove(&id).is_some() {
            debug!(correlation_id = %id, "Cancelled pending request");
            return true;
        }
        false
    }

    /// Get count of pending requests
    pub fn count(&self) -> usize {
        self.requests.len()
    }
}
