//! Tunnel Protocol Definitions
//!
//! This crate defines the messages exchanged between the public edge server
//! and the private-side agent, and the JSON envelope codec used to carry them
//! over the tunnel WebSocket.

pub mod codec;
pub mod headers;
pub mod messages;

pub use codec::{CodecError, TunnelCodec};
pub use headers::{HeaderField, Headers, HOP_BY_HOP_HEADERS};
pub use messages::*;

/// Protocol version announced by agents during the handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Default path on the edge server where agents open the tunnel channel
pub const DEFAULT_TUNNEL_PATH: &str = "/_edgelink/tunnel";

/// Name of the sticky-routing cookie pinning a public client to a tenant
pub const STICKY_COOKIE_NAME: &str = "__HostUrlPrefix";

/// Mask a secret for log output, keeping only a short prefix
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("abc"), "****");
        assert_eq!(mask_token("secret-token"), "secr****");
        assert_eq!(mask_token(""), "****");
    }
}
