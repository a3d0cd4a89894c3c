//! Protocol message types

use crate::headers::Headers;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use uuid::Uuid;

/// Main tunnel protocol message enum
///
/// Each variant maps to one named event on the wire (see [`TunnelMessage::event_name`]).
#[derive(Debug, Clone, PartialEq)]
pub enum TunnelMessage {
    // Channel lifecycle
    Connect(ConnectRequest),
    Connected(ConnectAccepted),
    Disconnect(DisconnectNotice),
    Ping(Heartbeat),
    Pong(Heartbeat),

    // HTTP forwarding (edge -> agent, agent acks)
    HttpRequest(ForwardedHttpRequest),
    HttpResponse(ForwardedHttpResponse),

    // WebSocket relaying
    WsOpen(WsOpen),
    WsFrame(WsFrame),
    WsClose(WsClose),
    WsMessage(WsMessage),
}

impl TunnelMessage {
    /// Wire event name for this message
    pub fn event_name(&self) -> Cow<'static, str> {
        match self {
            TunnelMessage::Connect(_) => Cow::Borrowed("connect"),
            TunnelMessage::Connected(_) => Cow::Borrowed("connected"),
            TunnelMessage::Disconnect(_) => Cow::Borrowed("disconnect"),
            TunnelMessage::Ping(_) => Cow::Borrowed("ping"),
            TunnelMessage::Pong(_) => Cow::Borrowed("pong"),
            TunnelMessage::HttpRequest(request) => Cow::Owned(format!("http-{}", request.id)),
            TunnelMessage::HttpResponse(_) => Cow::Borrowed("ack"),
            TunnelMessage::WsOpen(_) => Cow::Borrowed("ws-open"),
            TunnelMessage::WsFrame(frame) => Cow::Owned(format!("ws-{}", frame.id)),
            TunnelMessage::WsClose(_) => Cow::Borrowed("ws-close"),
            TunnelMessage::WsMessage(_) => Cow::Borrowed("ws-message"),
        }
    }

    /// Shorthand for a disconnect notice
    pub fn disconnect(reason: impl Into<String>) -> Self {
        TunnelMessage::Disconnect(DisconnectNotice {
            reason: reason.into(),
        })
    }
}

/// First message an agent sends after opening the tunnel channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Tenant routing token the agent serves
    pub token: String,
    /// Free-form agent identifier (for logs)
    pub agent_id: String,
    /// Agent software version
    #[serde(default)]
    pub version: String,
}

/// Edge confirms the agent joined its tenant room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAccepted {
    pub connection_id: Uuid,
    pub tenant: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisconnectNotice {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub timestamp: u64,
}

/// A public HTTP request serialized for the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedHttpRequest {
    /// Correlation id; the agent echoes it in its reply
    pub id: Uuid,
    pub method: String,
    /// Path and query with the tenant prefix stripped
    pub url: String,
    /// Path without the query string
    pub path: String,
    /// Decoded query parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Body,
}

/// The agent's reply to a [`ForwardedHttpRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardedHttpResponse {
    /// Correlation id of the request being answered
    pub id: Uuid,
    /// Missing status is treated as 500 by the edge
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub data: Body,
}

/// A public WebSocket was opened
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsOpen {
    pub client_id: Uuid,
    pub url: String,
}

/// A frame sent by a public WebSocket client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsFrame {
    pub client_id: Uuid,
    /// Id of the upgrade request that opened the socket
    pub id: Uuid,
    pub url: String,
    pub path: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub headers: Headers,
    pub body: FramePayload,
}

/// One side of a relayed WebSocket was closed
///
/// Sent by the edge when the public client goes away and by the agent when the
/// private service's socket ends first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsClose {
    pub client_id: Uuid,
}

/// A frame emitted by the private service's WebSocket
///
/// Without a `client_id` the frame goes to every public socket of the tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    pub data: FramePayload,
}

/// HTTP body carried through the tunnel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(text) => text.is_empty(),
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Json(_) => false,
        }
    }

    /// Flatten into raw bytes; structured values are serialized to JSON text
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Body::Empty => Vec::new(),
            Body::Text(text) => text.into_bytes(),
            Body::Bytes(bytes) => bytes,
            Body::Json(value) => value.to_string().into_bytes(),
        }
    }
}

/// A single WebSocket frame, keeping its text/binary kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FramePayload {
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

// Bytes travel as standard base64 inside the JSON envelope
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
