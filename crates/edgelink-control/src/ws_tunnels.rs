//! Public WebSocket tunnels
//!
//! Every public WebSocket accepted by the edge registers here under a fresh
//! client id. Frames published by an agent are routed to the matching public
//! sockets, but only within the agent's own tenant.

use dashmap::DashMap;
use edgelink_proto::FramePayload;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity of each public socket's outbound queue
pub const WS_QUEUE_SIZE: usize = 256;

/// Instruction for the task writing to a public WebSocket
#[derive(Debug, Clone, PartialEq)]
pub enum WsOutbound {
    Frame(FramePayload),
    /// The serving agent went away; close the public socket
    Close,
}

struct WsTunnel {
    tenant: String,
    sender: mpsc::Sender<WsOutbound>,
}

/// Table of open public WebSockets keyed by client id
#[derive(Clone, Default)]
pub struct WsTunnelTable {
    tunnels: Arc<DashMap<Uuid, WsTunnel>>,
}

impl WsTunnelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new public socket for `tenant`
    ///
    /// Returns the client id and the receiving end the socket's writer drains.
    pub fn register(&self, tenant: &str) -> (Uuid, mpsc::Receiver<WsOutbound>) {
        let (sender, receiver) = mpsc::channel(WS_QUEUE_SIZE);
        let client_id = Uuid::new_v4();
        self.tunnels.insert(
            client_id,
            WsTunnel {
                tenant: tenant.to_string(),
                sender,
            },
        );
        debug!(client_id = %client_id, tenant = %tenant, "Registered public websocket");
        (client_id, receiver)
    }

    pub fn unregister(&self, client_id: Uuid) -> bool {
        self.tunnels.remove(&client_id).is_some()
    }

    /// Deliver a frame to one client of `tenant`
    ///
    /// Frames are dropped when the client is unknown, belongs to another
    /// tenant, or its queue is full.
    pub fn deliver(&self, client_id: Uuid, tenant: &str, payload: FramePayload) -> bool {
        let Some(tunnel) = self.tunnels.get(&client_id) else {
            debug!(client_id = %client_id, "Dropping frame for unknown websocket client");
            return false;
        };
        if tunnel.tenant != tenant {
            warn!(
                client_id = %client_id,
                tenant = %tenant,
                "Dropping frame addressed to a websocket client of another tenant"
            );
            return false;
        }
        Self::push(client_id, &tunnel.sender, WsOutbound::Frame(payload))
    }

    /// Deliver a frame to every public socket of `tenant`
    pub fn broadcast(&self, tenant: &str, payload: FramePayload) -> usize {
        // Collect first so no shard lock is held while queueing
        let targets: Vec<(Uuid, mpsc::Sender<WsOutbound>)> = self
            .tunnels
            .iter()
            .filter(|entry| entry.tenant == tenant)
            .map(|entry| (*entry.key(), entry.sender.clone()))
            .collect();

        targets
            .iter()
            .filter(|(client_id, sender)| {
                Self::push(*client_id, sender, WsOutbound::Frame(payload.clone()))
            })
            .count()
    }

    /// Close and forget one client of `tenant` whose private side went away
    pub fn close_client(&self, client_id: Uuid, tenant: &str) -> bool {
        let Some((_, tunnel)) = self
            .tunnels
            .remove_if(&client_id, |_, tunnel| tunnel.tenant == tenant)
        else {
            debug!(
                client_id = %client_id,
                tenant = %tenant,
                "Ignoring close for unknown websocket client or other tenant"
            );
            return false;
        };
        let _ = tunnel.sender.try_send(WsOutbound::Close);
        true
    }

    /// Close and forget every public socket of `tenant`
    pub fn close_tenant(&self, tenant: &str) -> usize {
        let client_ids: Vec<Uuid> = self
            .tunnels
            .iter()
            .filter(|entry| entry.tenant == tenant)
            .map(|entry| *entry.key())
            .collect();

        let mut closed = 0;
        for client_id in client_ids {
            if let Some((_, tunnel)) = self.tunnels.remove(&client_id) {
                // A full queue still sees the channel close once the sender drops
                let _ = tunnel.sender.try_send(WsOutbound::Close);
                closed += 1;
            }
        }
        closed
    }

    pub fn count(&self) -> usize {
        self.tunnels.len()
    }

    fn push(client_id: Uuid, sender: &mpsc::Sender<WsOutbound>, outbound: WsOutbound) -> bool {
        match sender.try_send(outbound) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %client_id, "Websocket client queue full; dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client_id = %client_id, "Websocket client already closed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> FramePayload {
        FramePayload::Text(value.to_string())
    }

    #[tokio::test]
    async fn test_deliver_to_client() {
        let table = WsTunnelTable::new();
        let (client_id, mut rx) = table.register("alpha");

        assert!(table.deliver(client_id, "alpha", text("pong")));
        assert_eq!(rx.recv().await, Some(WsOutbound::Frame(text("pong"))));
    }

    #[tokio::test]
    async fn test_deliver_rejects_other_tenant() {
        let table = WsTunnelTable::new();
        let (client_id, mut rx) = table.register("alpha");

        assert!(!table.deliver(client_id, "beta", text("leak")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_stays_within_tenant() {
        let table = WsTunnelTable::new();
        let (_, mut alpha_one) = table.register("alpha");
        let (_, mut alpha_two) = table.register("alpha");
        let (_, mut beta) = table.register("beta");

        assert_eq!(table.broadcast("alpha", text("state")), 2);
        assert_eq!(alpha_one.recv().await, Some(WsOutbound::Frame(text("state"))));
        assert_eq!(alpha_two.recv().await, Some(WsOutbound::Frame(text("state"))));
        assert!(beta.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frames_keep_order() {
        let table = WsTunnelTable::new();
        let (client_id, mut rx) = table.register("alpha");

        for n in 0..10 {
            table.deliver(client_id, "alpha", text(&n.to_string()));
        }
        for n in 0..10 {
            assert_eq!(rx.recv().await, Some(WsOutbound::Frame(text(&n.to_string()))));
        }
    }

    #[tokio::test]
    async fn test_close_client_checks_tenant() {
        let table = WsTunnelTable::new();
        let (client_id, mut rx) = table.register("alpha");

        assert!(!table.close_client(client_id, "beta"));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.count(), 1);

        assert!(table.close_client(client_id, "alpha"));
        assert_eq!(rx.recv().await, Some(WsOutbound::Close));
        assert_eq!(rx.recv().await, None);
        assert!(!table.close_client(client_id, "alpha"));
    }

    #[tokio::test]
    async fn test_close_tenant() {
        let table = WsTunnelTable::new();
        let (_, mut alpha) = table.register("alpha");
        let (beta_id, _beta) = table.register("beta");

        assert_eq!(table.close_tenant("alpha"), 1);
        assert_eq!(alpha.recv().await, Some(WsOutbound::Close));
        assert_eq!(alpha.recv().await, None);

        assert_eq!(table.count(), 1);
        assert!(table.unregister(beta_id));
        assert!(!table.unregister(beta_id));
    }
}
