//! Tunnel client: keeps the channel to the edge open and serves it

use crate::bridge::WsBridge;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::executor::HttpExecutor;
use crate::reconnect::ReconnectManager;
use edgelink_proto::{
    mask_token, ConnectRequest, TunnelCodec, TunnelMessage, PROTOCOL_VERSION,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type TunnelSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Time the edge has to answer the handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the outbound tunnel queue
const OUTBOUND_QUEUE_SIZE: usize = 1024;

/// Agent's connection to the edge server
pub struct TunnelClient {
    config: AgentConfig,
    executor: HttpExecutor,
}

impl TunnelClient {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let executor = HttpExecutor::new(config.local_url.clone())
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self { config, executor })
    }

    /// Serve the tunnel until the edge rejects us or retries run out
    pub async fn run(&self) -> Result<(), AgentError> {
        let mut reconnect = ReconnectManager::new(self.config.reconnect.clone());

        loop {
            match self.run_session(&mut reconnect).await {
                Ok(()) => info!("Tunnel connection closed"),
                Err(AgentError::Rejected(reason)) => {
                    error!("Edge rejected this agent: {}", reason);
                    return Err(AgentError::Rejected(reason));
                }
                Err(e) => warn!("Tunnel connection lost: {}", e),
            }

            if !reconnect.wait().await {
                return Err(AgentError::Connect(format!(
                    "giving up after {} attempts",
                    reconnect.attempt() - 1
                )));
            }
            info!(attempt = reconnect.attempt(), "Reconnecting to edge");
        }
    }

    /// One connection: handshake, then serve until the channel closes
    async fn run_session(&self, reconnect: &mut ReconnectManager) -> Result<(), AgentError> {
        let url = self.config.tunnel_url();
        info!(
            url = %url,
            agent_id = %self.config.agent_id,
            token = %mask_token(&self.config.token),
            "Connecting to edge"
        );

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(TunnelCodec::MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(TunnelCodec::MAX_MESSAGE_SIZE);
        let (mut socket, _) = connect_async_with_config(url.as_str(), Some(ws_config), false)
            .await
            .map_err(|e| AgentError::Connect(e.to_string()))?;

        send_message(
            &mut socket,
            &TunnelMessage::Connect(ConnectRequest {
                token: self.config.token.clone(),
                agent_id: self.config.agent_id.clone(),
                version: format!("{}/{}", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
            }),
        )
        .await?;

        let accepted = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_message(&mut socket)).await {
            Ok(Some(TunnelMessage::Connected(accepted))) => accepted,
            Ok(Some(TunnelMessage::Disconnect(notice))) => {
                return Err(AgentError::Rejected(notice.reason))
            }
            Ok(Some(other)) => {
                return Err(AgentError::Transport(format!(
                    "unexpected {} during handshake",
                    other.event_name()
                )))
            }
            Ok(None) => return Err(AgentError::Transport("closed during handshake".into())),
            Err(_) => return Err(AgentError::Transport("handshake timed out".into())),
        };

        reconnect.reset();
        info!(
            tenant = %accepted.tenant,
            connection_id = %accepted.connection_id,
            "Tunnel established"
        );

        let (sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<TunnelMessage>(OUTBOUND_QUEUE_SIZE);
        let bridge = WsBridge::new(self.executor.base_url().clone(), tx.clone());

        let writer = tokio::spawn(async move {
            let mut sink = sink;
            while let Some(message) = rx.recv().await {
                let text = match TunnelCodec::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(event = %message.event_name(), "Failed to encode tunnel message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("Tunnel write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let result = loop {
            let message = match stream.next().await {
                Some(Ok(Message::Text(text))) => match TunnelCodec::decode(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Skipping undecodable tunnel frame: {}", e);
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(AgentError::from(e)),
            };

            match message {
                TunnelMessage::HttpRequest(request) => {
                    let executor = self.executor.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let reply = executor.execute(request).await;
                        if tx.send(TunnelMessage::HttpResponse(reply)).await.is_err() {
                            debug!("Tunnel closed before the reply was sent");
                        }
                    });
                }
                TunnelMessage::WsOpen(open) => bridge.open(open.client_id, &open.url),
                TunnelMessage::WsFrame(frame) => bridge.send(frame.client_id, frame.body),
                TunnelMessage::WsClose(close) => bridge.close(close.client_id),
                TunnelMessage::Ping(heartbeat) => {
                    let _ = tx.send(TunnelMessage::Pong(heartbeat)).await;
                }
                TunnelMessage::Pong(_) => {}
                TunnelMessage::Disconnect(notice) => {
                    info!(reason = %notice.reason, "Edge closed the tunnel");
                    break Ok(());
                }
                other => warn!(event = %other.event_name(), "Ignoring unexpected message"),
            }
        };

        bridge.close_all();
        writer.abort();
        result
    }
}

async fn send_message(socket: &mut TunnelSocket, message: &TunnelMessage) -> Result<(), AgentError> {
    let text = TunnelCodec::encode(message).map_err(|e| AgentError::Transport(e.to_string()))?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}

async fn read_message(socket: &mut TunnelSocket) -> Option<TunnelMessage> {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Text(text)) => match TunnelCodec::decode(&text) {
                Ok(message) => return Some(message),
                Err(e) => warn!("Skipping undecodable tunnel frame: {}", e),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}
