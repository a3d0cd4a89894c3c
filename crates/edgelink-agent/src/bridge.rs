//! Local WebSocket bridge
//!
//! Each public WebSocket announced by the edge gets one local WebSocket to the
//! private service, keyed by client id. Frames arriving before the local
//! socket is open wait in the client's queue and are sent in order once it is.
//! When the local side ends first (failed connect, close, error) the edge is
//! told with `ws-close` so it can close the public socket too.

use crate::error::ExecutorError;
use dashmap::DashMap;
use edgelink_proto::{FramePayload, TunnelMessage, WsClose, WsMessage};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Capacity of each local socket's pending frame queue
const FRAME_QUEUE_SIZE: usize = 256;

/// Map a forwarded url onto the private service's WebSocket endpoint
pub fn local_ws_url(base: &Url, path_and_query: &str) -> Result<Url, ExecutorError> {
    let mut url = crate::executor::join_url(base, path_and_query)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    // http(s) and ws(s) are all special schemes, so this cannot fail
    let _ = url.set_scheme(scheme);
    Ok(url)
}

/// Local WebSockets opened on behalf of public clients
#[derive(Clone)]
pub struct WsBridge {
    base_url: Url,
    clients: Arc<DashMap<Uuid, mpsc::Sender<FramePayload>>>,
    /// Queue of the tunnel connection, for frames going back to the edge
    tunnel: mpsc::Sender<TunnelMessage>,
}

impl WsBridge {
    pub fn new(base_url: Url, tunnel: mpsc::Sender<TunnelMessage>) -> Self {
        Self {
            base_url,
            clients: Arc::new(DashMap::new()),
            tunnel,
        }
    }

    /// Open a local WebSocket for `client_id`
    pub fn open(&self, client_id: Uuid, url: &str) {
        let target = match local_ws_url(&self.base_url, url) {
            Ok(target) => target,
            Err(e) => {
                warn!(client_id = %client_id, "Cannot open local websocket: {}", e);
                return;
            }
        };

        let (tx, rx) = mpsc::channel(FRAME_QUEUE_SIZE);
        // Weak, so that removing the entry still closes the queue
        let own = tx.downgrade();
        if self.clients.insert(client_id, tx).is_some() {
            warn!(client_id = %client_id, "Replacing existing local websocket");
        }

        let bridge = self.clone();
        tokio::spawn(async move {
            bridge.run_client(client_id, target, rx).await;
            if bridge.release(client_id, &own) {
                bridge.notify_closed(client_id).await;
            }
        });
    }

    /// Remove the entry of `client_id` if it still holds this task's queue
    ///
    /// Returns false when the edge already closed it or a newer socket took
    /// the id over.
    fn release(&self, client_id: Uuid, own: &mpsc::WeakSender<FramePayload>) -> bool {
        let Some(own) = own.upgrade() else {
            return false;
        };
        self.clients
            .remove_if(&client_id, |_, sender| sender.same_channel(&own))
            .is_some()
    }

    async fn notify_closed(&self, client_id: Uuid) {
        let close = TunnelMessage::WsClose(WsClose { client_id });
        if self.tunnel.send(close).await.is_err() {
            debug!(client_id = %client_id, "Tunnel gone before ws-close was sent");
        }
    }

    /// Queue a frame from the public client for its local socket
    pub fn send(&self, client_id: Uuid, payload: FramePayload) {
        let Some(sender) = self.clients.get(&client_id) else {
            debug!(client_id = %client_id, "Dropping frame for unknown local websocket");
            return;
        };
        if let Err(e) = sender.try_send(payload) {
            warn!(client_id = %client_id, "Dropping frame for local websocket: {}", e);
        }
    }

    /// Close the local socket of `client_id` once its queued frames are sent
    pub fn close(&self, client_id: Uuid) {
        if self.clients.remove(&client_id).is_some() {
            debug!(client_id = %client_id, "Closing local websocket");
        }
    }

    /// Close every local socket
    pub fn close_all(&self) {
        let count = self.clients.len();
        self.clients.clear();
        if count > 0 {
            info!(count, "Closed local websockets");
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    async fn run_client(&self, client_id: Uuid, target: Url, mut frames: mpsc::Receiver<FramePayload>) {
        let socket = match connect_async(target.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(client_id = %client_id, url = %target, "Local websocket connect failed: {}", e);
                return;
            }
        };
        info!(client_id = %client_id, url = %target, "Local websocket opened");

        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        let _ = sink.close().await;
                        break;
                    };
                    let message = match frame {
                        FramePayload::Text(text) => Message::Text(text),
                        FramePayload::Bytes(bytes) => Message::Binary(bytes),
                    };
                    if let Err(e) = sink.send(message).await {
                        debug!(client_id = %client_id, "Local websocket write failed: {}", e);
                        break;
                    }
                }
                message = stream.next() => {
                    let data = match message {
                        Some(Ok(Message::Text(text))) => FramePayload::Text(text),
                        Some(Ok(Message::Binary(bytes))) => FramePayload::Bytes(bytes),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!(client_id = %client_id, "Local websocket read failed: {}", e);
                            break;
                        }
                    };
                    let reply = TunnelMessage::WsMessage(WsMessage {
                        client_id: Some(client_id),
                        data,
                    });
                    if self.tunnel.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(client_id = %client_id, "Local websocket closed");
    }
}
