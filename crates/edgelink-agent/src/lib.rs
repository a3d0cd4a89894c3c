//! Private-side agent
//!
//! Opens the tunnel channel to the edge server and replays everything that
//! arrives on it against the private service: HTTP requests through
//! [`HttpExecutor`], WebSockets through [`WsBridge`].
pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod reconnect;

pub use bridge::WsBridge;
pub use client::TunnelClient;
pub use config::{AgentArgs, AgentConfig, ConfigFile};
pub use error::{AgentError, ExecutorError};
pub use executor::HttpExecutor;
pub use reconnect::{ReconnectConfig, ReconnectManager};
