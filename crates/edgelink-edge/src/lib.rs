//! Public edge server
//!
//! Accepts public HTTP and WebSocket traffic, resolves each request's tenant
//! and relays it over the tenant's tunnel channel to the agent running next to
//! the private service.
pub mod config;
pub mod error;
pub mod forward;
pub mod server;
pub mod session;
pub mod tunnel;
pub mod websocket;

pub use config::{EdgeArgs, EdgeConfig};
pub use error::EdgeError;
pub use server::{EdgeHandle, EdgeServer, EdgeState, PUBLIC_WEBSOCKET_PATH};
pub use session::ResolvedTenant;
