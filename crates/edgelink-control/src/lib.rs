//! Control plane for tunnel orchestration
//!
//! Tenant rooms, the correlation table for forwarded requests, room-addressed
//! delivery to agents and the table of public WebSockets.
pub mod channel;
pub mod connection;
pub mod control;
pub mod pending_requests;
pub mod registry;
pub mod ws_tunnels;

pub use channel::{TunnelChannel, DEFAULT_REQUEST_TIMEOUT};
pub use connection::{AgentConnection, ConnectionId, OUTBOUND_QUEUE_SIZE};
pub use control::{ControlPlane, DispatchOutcome};
pub use pending_requests::{PendingRequests, Resolution};
pub use registry::{Departure, TenantRegistry};
pub use ws_tunnels::{WsOutbound, WsTunnelTable};

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while talking to agents
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("No agent connected for tenant {0}")]
    NotConnected(String),

    #[error("Agent connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Request {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Unknown agent token {0}")]
    Unauthorized(String),
}
