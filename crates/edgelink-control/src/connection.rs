//! Agent connection handles

use crate::ChannelError;
use edgelink_proto::TunnelMessage;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of one live tunnel channel
pub type ConnectionId = Uuid;

/// Capacity of the per-connection outbound queue
pub const OUTBOUND_QUEUE_SIZE: usize = 1024;

/// Handle to an authenticated agent connection
///
/// Messages pushed through [`AgentConnection::send`] land on a single queue
/// drained by the connection's writer task, so frames keep the order in which
/// they were sent. The handle is cheap to clone; the registry keeps one clone
/// per room member.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub connection_id: ConnectionId,
    pub agent_id: String,
    pub tenant: String,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    sender: mpsc::Sender<TunnelMessage>,
}

impl AgentConnection {
    pub fn new(tenant: String, agent_id: String, sender: mpsc::Sender<TunnelMessage>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            agent_id,
            tenant,
            connected_at: chrono::Utc::now(),
            sender,
        }
    }

    /// Queue a message for this agent
    pub async fn send(&self, message: TunnelMessage) -> Result<(), ChannelError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ChannelError::Closed(self.connection_id))
    }

    /// Whether the writer side of this connection has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
