//! Tunnel channel: room-addressed delivery and request/reply over agents

use crate::pending_requests::PendingRequests;
use crate::registry::TenantRegistry;
use crate::ChannelError;
use edgelink_proto::{ForwardedHttpRequest, ForwardedHttpResponse, TunnelMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default deadline for forwarded HTTP requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

/// Sends messages to the agents of a tenant room
#[derive(Clone)]
pub struct TunnelChannel {
    registry: Arc<TenantRegistry>,
    pending: PendingRequests,
}

/// Cancels the pending entry when the waiting call goes away
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

impl TunnelChannel {
    pub fn new(registry: Arc<TenantRegistry>, pending: PendingRequests) -> Self {
        Self { registry, pending }
    }

    /// Fire-and-forget delivery to every connection joined to `tenant`
    ///
    /// Returns the number of connections the message was queued for.
    pub async fn emit(&self, tenant: &str, message: TunnelMessage) -> Result<usize, ChannelError> {
        let members = self.registry.members_of(tenant);
        if members.is_empty() {
            return Err(ChannelError::NotConnected(tenant.to_string()));
        }

        let mut queued = 0;
        for member in &members {
            if member.is_closed() {
                debug!(tenant = %tenant, connection_id = %member.connection_id, "Skipping closing member");
                continue;
            }
            match member.send(message.clone()).await {
                Ok(()) => queued += 1,
                Err(e) => debug!(tenant = %tenant, "Skipping member: {}", e),
            }
        }

        if queued == 0 {
            return Err(ChannelError::NotConnected(tenant.to_string()));
        }
        Ok(queued)
    }

    /// Forward an HTTP request to `tenant` and wait for the matching reply
    ///
    /// The pending entry is registered before delivery, so an empty room waits
    /// out the deadline instead of failing fast. Whatever happens, the entry is
    /// gone when this returns or when the future is dropped.
    pub async fn request(
        &self,
        tenant: &str,
        request: ForwardedHttpRequest,
        timeout: Duration,
    ) -> Result<ForwardedHttpResponse, ChannelError> {
        let id = request.id;
        let deadline = Instant::now() + timeout;

        let reply = self.pending.register(id, tenant);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        match timeout_at(deadline, self.emit(tenant, TunnelMessage::HttpRequest(request))).await {
            Ok(Ok(queued)) => {
                debug!(correlation_id = %id, tenant = %tenant, queued, "Forwarded request")
            }
            Ok(Err(e)) => {
                debug!(correlation_id = %id, tenant = %tenant, "Request not delivered yet: {}", e)
            }
            Err(_) => {
                warn!(correlation_id = %id, tenant = %tenant, "Timed out queueing request");
                return Err(ChannelError::Timeout(timeout));
            }
        }

        match timeout_at(deadline, reply).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ChannelError::Cancelled(id)),
            Err(_) => {
                warn!(
                    correlation_id = %id,
                    tenant = %tenant,
                    timeout_ms = timeout.as_millis() as u64,
                    "No reply before deadline"
                );
                Err(ChannelError::Timeout(timeout))
            }
        }
    }
}
