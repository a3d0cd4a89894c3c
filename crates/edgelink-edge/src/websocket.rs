//! Public WebSocket relay
//!
//! A public socket is announced to the tenant's agent with `ws-open`, every
//! frame it sends goes out as `ws-<requestId>` tagged with its client id, and
//! its end is announced with `ws-close`. Frames coming back from the agent
//! arrive through the control plane's tunnel table, and so does the close
//! notice sent when the private side ends first. A socket whose `ws-open`
//! reaches no agent is closed right away.

use crate::forward::{collect_headers, forward_http, split_url};
use crate::server::EdgeState;
use crate::session::ResolvedTenant;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    response::Response,
    Extension,
};
use edgelink_control::WsOutbound;
use edgelink_proto::{FramePayload, Headers, TunnelMessage, WsClose, WsFrame, WsOpen};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upgrade request as seen by the relay
struct UpgradeContext {
    request_id: Uuid,
    tenant: String,
    url: String,
    path: String,
    params: HashMap<String, String>,
    headers: Headers,
}

/// Handler for the public WebSocket routes
///
/// Requests without upgrade headers are ordinary HTTP and get forwarded as such.
pub async fn websocket_ingress(
    State(state): State<Arc<EdgeState>>,
    Extension(resolved): Extension<ResolvedTenant>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    request: Request,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(url = %resolved.url, "Not a websocket upgrade ({}), forwarding as HTTP", rejection);
            return forward_http(&state, resolved, request).await;
        }
    };

    let (path, params) = split_url(&resolved.url);
    let context = UpgradeContext {
        request_id: Uuid::new_v4(),
        headers: collect_headers(request.headers()),
        tenant: resolved.tenant,
        url: resolved.url,
        path,
        params,
    };

    upgrade
        .max_message_size(state.config.max_body_bytes)
        .on_upgrade(move |socket| relay_public_socket(state, context, socket))
}

async fn relay_public_socket(state: Arc<EdgeState>, context: UpgradeContext, mut socket: WebSocket) {
    let control = &state.control;
    let (client_id, mut agent_frames) = control.open_ws(&context.tenant);
    info!(
        client_id = %client_id,
        tenant = %context.tenant,
        url = %context.url,
        "Public websocket opened"
    );

    // Announced before any frame is read so the agent sees the open first
    let open = TunnelMessage::WsOpen(WsOpen {
        client_id,
        url: context.url.clone(),
    });
    if let Err(e) = control.announce(&context.tenant, open).await {
        warn!(
            client_id = %client_id,
            tenant = %context.tenant,
            "No agent for public websocket, closing: {}",
            e
        );
        control.close_ws(client_id);
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (mut sink, mut stream) = socket.split();

    let writer = async {
        while let Some(outbound) = agent_frames.recv().await {
            let message = match outbound {
                WsOutbound::Frame(FramePayload::Text(text)) => Message::Text(text.into()),
                WsOutbound::Frame(FramePayload::Bytes(bytes)) => Message::Binary(bytes.into()),
                WsOutbound::Close => {
                    debug!(client_id = %client_id, "Closing public websocket, private side is gone");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(Ok(message)) = stream.next().await {
            let body = match message {
                Message::Text(text) => FramePayload::Text(text.as_str().to_string()),
                Message::Binary(bytes) => FramePayload::Bytes(bytes.to_vec()),
                Message::Close(_) => break,
                // Pings are answered by the websocket layer
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let frame = TunnelMessage::WsFrame(WsFrame {
                client_id,
                id: context.request_id,
                url: context.url.clone(),
                path: context.path.clone(),
                params: context.params.clone(),
                headers: context.headers.clone(),
                body,
            });
            if let Err(e) = control.announce(&context.tenant, frame).await {
                debug!(client_id = %client_id, "Dropped public frame: {}", e);
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    control.close_ws(client_id);
    let close = TunnelMessage::WsClose(WsClose { client_id });
    if let Err(e) = control.announce(&context.tenant, close).await {
        debug!(client_id = %client_id, "ws-close not delivered: {}", e);
    }
    info!(client_id = %client_id, tenant = %context.tenant, "Public websocket closed");
}
