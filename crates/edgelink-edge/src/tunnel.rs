//! Agent side of the edge: the tunnel channel endpoint
//!
//! An agent opens a WebSocket at the tunnel path and must start with a
//! `connect` message carrying its tenant token. A bad or missing handshake is
//! answered with `disconnect` and the socket is closed before the agent joins
//! any room. After that, one writer task drains the connection's outbound
//! queue and sends keepalive pings while this task reads and dispatches.

use crate::server::EdgeState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use edgelink_control::{ControlPlane, DispatchOutcome, OUTBOUND_QUEUE_SIZE};
use edgelink_proto::{ConnectAccepted, Heartbeat, TunnelCodec, TunnelMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub async fn tunnel_ingress(State(state): State<Arc<EdgeState>>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(TunnelCodec::MAX_MESSAGE_SIZE)
        .max_frame_size(TunnelCodec::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_agent_socket(state, socket))
}

/// Removes the connection from its room however the handler exits
struct Membership<'a> {
    control: &'a ControlPlane,
    connection_id: Uuid,
}

impl Drop for Membership<'_> {
    fn drop(&mut self) {
        self.control.detach(self.connection_id);
    }
}

async fn handle_agent_socket(state: Arc<EdgeState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let control = &state.control;

    let connect = match tokio::time::timeout(state.config.handshake_timeout, read_message(&mut stream)).await {
        Ok(Some(TunnelMessage::Connect(connect))) => connect,
        Ok(Some(other)) => {
            warn!(event = %other.event_name(), "Agent did not start with connect");
            reject(&mut sink, "expected connect").await;
            return;
        }
        Ok(None) => {
            debug!("Agent socket closed before handshake");
            return;
        }
        Err(_) => {
            warn!("Agent handshake timed out");
            reject(&mut sink, "handshake timeout").await;
            return;
        }
    };

    let tenant = match control.authenticate(&connect) {
        Ok(tenant) => tenant,
        Err(e) => {
            reject(&mut sink, &format!("authentication failed: {}", e)).await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
    let connection = control.attach(&tenant, &connect.agent_id, tx);
    let _membership = Membership {
        control,
        connection_id: connection.connection_id,
    };

    info!(
        tenant = %tenant,
        connection_id = %connection.connection_id,
        agent_id = %connect.agent_id,
        version = %connect.version,
        "Agent connected"
    );

    let accepted = TunnelMessage::Connected(ConnectAccepted {
        connection_id: connection.connection_id,
        tenant: tenant.clone(),
    });
    if send_message(&mut sink, &accepted).await.is_err() {
        return;
    }

    let writer = tokio::spawn(writer_task(
        sink,
        rx,
        state.config.ping_interval,
        connection.connection_id,
    ));

    while let Some(message) = read_message(&mut stream).await {
        match control.dispatch(&connection, message) {
            DispatchOutcome::Continue => {}
            DispatchOutcome::Reply(reply) => {
                if connection.send(reply).await.is_err() {
                    break;
                }
            }
            DispatchOutcome::Close => break,
        }
    }

    writer.abort();
    info!(
        tenant = %tenant,
        connection_id = %connection.connection_id,
        "Agent connection closed"
    );
}

/// Drains the outbound queue onto the socket and keeps the channel alive
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<TunnelMessage>,
    ping_interval: Duration,
    connection_id: Uuid,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await;

    loop {
        let message = tokio::select! {
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = ticker.tick() => TunnelMessage::Ping(Heartbeat { timestamp: unix_millis() }),
        };

        if let Err(e) = send_message(&mut sink, &message).await {
            debug!(connection_id = %connection_id, "Agent socket write failed: {}", e);
            break;
        }
    }

    debug!(connection_id = %connection_id, "Agent writer task ended");
    let _ = sink.close().await;
}

/// Read the next tunnel message, skipping frames that do not decode
///
/// Returns None once the socket is closed or broken.
async fn read_message(stream: &mut SplitStream<WebSocket>) -> Option<TunnelMessage> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match TunnelCodec::decode(text.as_str()) {
                Ok(message) => return Some(message),
                Err(e) => warn!("Skipping undecodable tunnel frame: {}", e),
            },
            Ok(Message::Binary(_)) => warn!("Skipping binary tunnel frame"),
            Ok(Message::Close(_)) => return None,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!("Agent socket error: {}", e);
                return None;
            }
        }
    }
    None
}

async fn send_message(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &TunnelMessage,
) -> Result<(), axum::Error> {
    let text = match TunnelCodec::encode(message) {
        Ok(text) => text,
        Err(e) => {
            // One oversized message must not take the channel down
            error!(event = %message.event_name(), "Failed to encode tunnel message: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}

async fn reject(sink: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let _ = send_message(sink, &TunnelMessage::disconnect(reason)).await;
    let _ = sink.close().await;
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
