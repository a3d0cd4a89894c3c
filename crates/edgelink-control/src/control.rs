//! Control plane shared by the edge's ingress handlers and agent connections

use crate::channel::TunnelChannel;
use crate::connection::{AgentConnection, ConnectionId};
use crate::pending_requests::{PendingRequests, Resolution};
use crate::registry::TenantRegistry;
use crate::ws_tunnels::{WsOutbound, WsTunnelTable};
use crate::ChannelError;
use edgelink_proto::{
    mask_token, ConnectRequest, ForwardedHttpRequest, ForwardedHttpResponse, TunnelMessage,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the connection loop should do after a message was handled
#[derive(Debug, PartialEq)]
pub enum DispatchOutcome {
    Continue,
    /// Send this message back on the same connection
    Reply(TunnelMessage),
    /// The agent said goodbye; stop reading
    Close,
}

/// Shared state of one edge server
pub struct ControlPlane {
    tenants: HashSet<String>,
    registry: Arc<TenantRegistry>,
    pending: PendingRequests,
    channel: TunnelChannel,
    ws_tunnels: WsTunnelTable,
}

impl ControlPlane {
    pub fn new<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Arc::new(TenantRegistry::new());
        let pending = PendingRequests::new();
        Self {
            tenants: tenants.into_iter().map(Into::into).collect(),
            channel: TunnelChannel::new(registry.clone(), pending.clone()),
            registry,
            pending,
            ws_tunnels: WsTunnelTable::new(),
        }
    }

    pub fn is_tenant(&self, token: &str) -> bool {
        self.tenants.contains(token)
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn ws_tunnels(&self) -> &WsTunnelTable {
        &self.ws_tunnels
    }

    /// Check an agent's handshake; returns the tenant it may serve
    pub fn authenticate(&self, request: &ConnectRequest) -> Result<String, ChannelError> {
        if self.is_tenant(&request.token) {
            return Ok(request.token.clone());
        }
        warn!(
            agent_id = %request.agent_id,
            token = %mask_token(&request.token),
            "Rejected agent with unknown token"
        );
        Err(ChannelError::Unauthorized(mask_token(&request.token)))
    }

    /// Join an authenticated agent connection to its tenant room
    pub fn attach(
        &self,
        tenant: &str,
        agent_id: &str,
        sender: mpsc::Sender<TunnelMessage>,
    ) -> AgentConnection {
        let connection = AgentConnection::new(tenant.to_string(), agent_id.to_string(), sender);
        self.registry.join(tenant, connection.clone());
        connection
    }

    /// Remove a connection from its room
    ///
    /// When the room becomes empty the tenant's public WebSockets are closed,
    /// since nothing could answer their frames anymore.
    pub fn detach(&self, connection_id: ConnectionId) {
        let Some(departure) = self.registry.leave(connection_id) else {
            return;
        };
        if departure.remaining == 0 {
            let closed = self.ws_tunnels.close_tenant(&departure.tenant);
            if closed > 0 {
                info!(
                    tenant = %departure.tenant,
                    closed,
                    "Closed orphaned public websockets"
                );
            }
        }
    }

    /// Handle one message read from an agent connection
    pub fn dispatch(&self, connection: &AgentConnection, message: TunnelMessage) -> DispatchOutcome {
        match message {
            TunnelMessage::HttpResponse(response) => {
                let id = response.id;
                match self.pending.respond(id, &connection.tenant, response) {
                    Resolution::Delivered => {}
                    Resolution::Unknown => debug!(
                        correlation_id = %id,
                        connection_id = %connection.connection_id,
                        "Discarded reply with no waiting request"
                    ),
                    Resolution::WrongTenant | Resolution::CallerGone => {}
                }
                DispatchOutcome::Continue
            }
            TunnelMessage::WsMessage(message) => {
                match message.client_id {
                    Some(client_id) => {
                        self.ws_tunnels
                            .deliver(client_id, &connection.tenant, message.data);
                    }
                    None => {
                        let delivered = self.ws_tunnels.broadcast(&connection.tenant, message.data);
                        debug!(tenant = %connection.tenant, delivered, "Broadcast agent frame");
                    }
                }
                DispatchOutcome::Continue
            }
            TunnelMessage::WsClose(close) => {
                if self
                    .ws_tunnels
                    .close_client(close.client_id, &connection.tenant)
                {
                    debug!(
                        client_id = %close.client_id,
                        tenant = %connection.tenant,
                        "Private side closed, closing public websocket"
                    );
                }
                DispatchOutcome::Continue
            }
            TunnelMessage::Ping(heartbeat) => DispatchOutcome::Reply(TunnelMessage::Pong(heartbeat)),
            TunnelMessage::Pong(_) => DispatchOutcome::Continue,
            TunnelMessage::Disconnect(notice) => {
                info!(
                    connection_id = %connection.connection_id,
                    reason = %notice.reason,
                    "Agent disconnected"
                );
                DispatchOutcome::Close
            }
            other => {
                warn!(
                    connection_id = %connection.connection_id,
                    event = %other.event_name(),
                    "Ignoring unexpected message from agent"
                );
                DispatchOutcome::Continue
            }
        }
    }

    /// Forward an HTTP request to the tenant's agent and wait for its reply
    pub async fn forward(
        &self,
        tenant: &str,
        request: ForwardedHttpRequest,
        timeout: Duration,
    ) -> Result<ForwardedHttpResponse, ChannelError> {
        self.channel.request(tenant, request, timeout).await
    }

    /// Fire-and-forget delivery to the tenant's agent
    pub async fn announce(&self, tenant: &str, message: TunnelMessage) -> Result<usize, ChannelError> {
        self.channel.emit(tenant, message).await
    }

    /// Register a public WebSocket for `tenant`
    pub fn open_ws(&self, tenant: &str) -> (Uuid, mpsc::Receiver<WsOutbound>) {
        self.ws_tunnels.register(tenant)
    }

    pub fn close_ws(&self, client_id: Uuid) {
        self.ws_tunnels.unregister(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_proto::{Body, FramePayload, Headers, Heartbeat, WsClose, WsMessage};

    fn connect(token: &str) -> ConnectRequest {
        ConnectRequest {
            token: token.to_string(),
            agent_id: "agent-1".to_string(),
            version: "test".to_string(),
        }
    }

    fn attach(control: &ControlPlane, tenant: &str) -> (AgentConnection, mpsc::Receiver<TunnelMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (control.attach(tenant, "agent-1", tx), rx)
    }

    #[test]
    fn test_authenticate() {
        let control = ControlPlane::new(["alpha", "beta"]);

        assert_eq!(control.authenticate(&connect("beta")).unwrap(), "beta");
        assert!(matches!(
            control.authenticate(&connect("gamma")),
            Err(ChannelError::Unauthorized(_))
        ));
        assert_eq!(control.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let control = ControlPlane::new(["alpha"]);
        let (connection, _rx) = attach(&control, "alpha");

        let outcome = control.dispatch(&connection, TunnelMessage::Ping(Heartbeat { timestamp: 7 }));
        assert_eq!(
            outcome,
            DispatchOutcome::Reply(TunnelMessage::Pong(Heartbeat { timestamp: 7 }))
        );
    }

    #[tokio::test]
    async fn test_reply_from_other_tenant_is_ignored() {
        let control = ControlPlane::new(["alpha", "beta"]);
        let (beta, _rx) = attach(&control, "beta");

        let id = Uuid::new_v4();
        let mut reply_rx = control.pending().register(id, "alpha");

        control.dispatch(
            &beta,
            TunnelMessage::HttpResponse(ForwardedHttpResponse {
                id,
                status: Some(200),
                headers: Headers::new(),
                data: Body::Empty,
            }),
        );

        assert!(reply_rx.try_recv().is_err());
        assert_eq!(control.pending().count(), 1);
    }

    #[tokio::test]
    async fn test_ws_message_routing() {
        let control = ControlPlane::new(["alpha", "beta"]);
        let (alpha, _alpha_rx) = attach(&control, "alpha");
        let (beta, _beta_rx) = attach(&control, "beta");
        let (client_id, mut public) = control.open_ws("alpha");

        // Targeted frame from the wrong tenant is dropped
        control.dispatch(
            &beta,
            TunnelMessage::WsMessage(WsMessage {
                client_id: Some(client_id),
                data: FramePayload::Text("leak".to_string()),
            }),
        );
        // Untargeted frame from the right tenant is delivered
        control.dispatch(
            &alpha,
            TunnelMessage::WsMessage(WsMessage {
                client_id: None,
                data: FramePayload::Text("pong".to_string()),
            }),
        );

        assert_eq!(
            public.recv().await,
            Some(WsOutbound::Frame(FramePayload::Text("pong".to_string())))
        );
        assert!(public.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ws_close_from_agent_closes_public_socket() {
        let control = ControlPlane::new(["alpha", "beta"]);
        let (alpha, _alpha_rx) = attach(&control, "alpha");
        let (beta, _beta_rx) = attach(&control, "beta");
        let (client_id, mut public) = control.open_ws("alpha");

        // Another tenant's agent cannot close it
        control.dispatch(&beta, TunnelMessage::WsClose(WsClose { client_id }));
        assert!(public.try_recv().is_err());
        assert_eq!(control.ws_tunnels().count(), 1);

        let outcome = control.dispatch(&alpha, TunnelMessage::WsClose(WsClose { client_id }));
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert_eq!(public.recv().await, Some(WsOutbound::Close));
        assert_eq!(control.ws_tunnels().count(), 0);
    }

    #[tokio::test]
    async fn test_detach_last_agent_closes_public_sockets() {
        let control = ControlPlane::new(["alpha"]);
        let (first, _rx1) = attach(&control, "alpha");
        let (second, _rx2) = attach(&control, "alpha");
        let (_, mut public) = control.open_ws("alpha");

        control.detach(first.connection_id);
        assert!(public.try_recv().is_err());

        control.detach(second.connection_id);
        assert_eq!(public.recv().await, Some(WsOutbound::Close));
        assert_eq!(control.ws_tunnels().count(), 0);
    }

    #[test]
    fn test_disconnect_closes() {
        let control = ControlPlane::new(["alpha"]);
        let (tx, _rx) = mpsc::channel(1);
        let connection = control.attach("alpha", "agent-1", tx);

        assert_eq!(
            control.dispatch(&connection, TunnelMessage::disconnect("shutting down")),
            DispatchOutcome::Close
        );
    }
}
