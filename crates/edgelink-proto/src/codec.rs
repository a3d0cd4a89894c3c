//! Codec for encoding/decoding tunnel messages
//!
//! Every message travels as one WebSocket text frame holding a JSON envelope:
//! `{"event": "<name>", "data": <payload>}`.

use crate::messages::TunnelMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Tunnel message codec
pub struct TunnelCodec;

impl TunnelCodec {
    /// Maximum encoded message size (a 100 MB body plus base64 overhead)
    pub const MAX_MESSAGE_SIZE: usize = 160 * 1024 * 1024;

    /// Encode a tunnel message into the text of one WebSocket frame
    pub fn encode(msg: &TunnelMessage) -> Result<String, CodecError> {
        let data = match msg {
            TunnelMessage::Connect(inner) => serde_json::to_value(inner)?,
            TunnelMessage::Connected(inner) => serde_json::to_value(inner)?,
            TunnelMessage::Disconnect(inner) => serde_json::to_value(inner)?,
            TunnelMessage::Ping(inner) | TunnelMessage::Pong(inner) => {
                serde_json::to_value(inner)?
            }
            TunnelMessage::HttpRequest(inner) => serde_json::to_value(inner)?,
            TunnelMessage::HttpResponse(inner) => serde_json::to_value(inner)?,
            TunnelMessage::WsOpen(inner) => serde_json::to_value(inner)?,
            TunnelMessage::WsFrame(inner) => serde_json::to_value(inner)?,
            TunnelMessage::WsClose(inner) => serde_json::to_value(inner)?,
            TunnelMessage::WsMessage(inner) => serde_json::to_value(inner)?,
        };

        let envelope = Envelope {
            event: msg.event_name().into_owned(),
            data,
        };
        let encoded = serde_json::to_string(&envelope)?;

        if encoded.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(encoded.len()));
        }

        Ok(encoded)
    }

    /// Decode the text of one WebSocket frame into a tunnel message
    pub fn decode(text: &str) -> Result<TunnelMessage, CodecError> {
        if text.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(text.len()));
        }

        let Envelope { event, data } = serde_json::from_str(text)?;

        let message = match event.as_str() {
            "connect" => TunnelMessage::Connect(serde_json::from_value(data)?),
            "connected" => TunnelMessage::Connected(serde_json::from_value(data)?),
            "disconnect" => TunnelMessage::Disconnect(serde_json::from_value(data)?),
            "ping" => TunnelMessage::Ping(serde_json::from_value(data)?),
            "pong" => TunnelMessage::Pong(serde_json::from_value(data)?),
            "ack" => TunnelMessage::HttpResponse(serde_json::from_value(data)?),
            "ws-open" => TunnelMessage::WsOpen(serde_json::from_value(data)?),
            "ws-close" => TunnelMessage::WsClose(serde_json::from_value(data)?),
            "ws-message" => TunnelMessage::WsMessage(serde_json::from_value(data)?),
            name if name.starts_with("http-") => {
                TunnelMessage::HttpRequest(serde_json::from_value(data)?)
            }
            name if name.starts_with("ws-") => TunnelMessage::WsFrame(serde_json::from_value(data)?),
            _ => return Err(CodecError::UnknownEvent(event)),
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::messages::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn test_http_request_envelope() {
        let id = Uuid::new_v4();
        let msg = TunnelMessage::HttpRequest(ForwardedHttpRequest {
            id,
            method: "POST".to_string(),
            url: "/api/services?x=1".to_string(),
            path: "/api/services".to_string(),
            params: HashMap::from([("x".to_string(), "1".to_string())]),
            headers: Headers::from([("content-type".to_string(), "text/plain".into())]),
            body: Body::Text("hello".to_string()),
        });

        let encoded = TunnelCodec::encode(&msg).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(raw["event"], format!("http-{}", id));
        assert_eq!(raw["data"]["url"], "/api/services?x=1");
        assert_eq!(raw["data"]["body"]["type"], "text");

        assert_eq!(TunnelCodec::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_ws_frame_event_is_not_confused_with_lifecycle_events() {
        let client_id = Uuid::new_v4();
        let open = TunnelMessage::WsOpen(WsOpen {
            client_id,
            url: "/api/websocket".to_string(),
        });
        let frame = TunnelMessage::WsFrame(WsFrame {
            client_id,
            id: Uuid::new_v4(),
            url: "/api/websocket".to_string(),
            path: "/api/websocket".to_string(),
            params: HashMap::new(),
            headers: Headers::new(),
            body: FramePayload::Text("ping".to_string()),
        });

        let decoded_open = TunnelCodec::decode(&TunnelCodec::encode(&open).unwrap()).unwrap();
        let decoded_frame = TunnelCodec::decode(&TunnelCodec::encode(&frame).unwrap()).unwrap();
        assert!(matches!(decoded_open, TunnelMessage::WsOpen(_)));
        assert!(matches!(decoded_frame, TunnelMessage::WsFrame(_)));
    }

    #[test]
    fn test_unknown_event() {
        let result = TunnelCodec::decode(r#"{"event":"request-1","data":{}}"#);
        assert!(matches!(result, Err(CodecError::UnknownEvent(name)) if name == "request-1"));
    }

    #[test]
    fn test_malformed_payload() {
        let result = TunnelCodec::decode(r#"{"event":"ws-open","data":{"url":"/"}}"#);
        assert!(matches!(result, Err(CodecError::SerializationError(_))));

        let result = TunnelCodec::decode("not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_ack_without_status() {
        let id = Uuid::new_v4();
        let text = format!(r#"{{"event":"ack","data":{{"id":"{}"}}}}"#, id);
        match TunnelCodec::decode(&text).unwrap() {
            TunnelMessage::HttpResponse(response) => {
                assert_eq!(response.id, id);
                assert_eq!(response.status, None);
            }
            other => panic!("Expected ack, got {:?}", other),
        }
    }
}
