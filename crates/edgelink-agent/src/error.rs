//! Agent errors

use thiserror::Error;

/// Errors of the agent's tunnel client
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to connect to edge: {0}")]
    Connect(String),

    /// The edge refused the handshake; retrying will not help
    #[error("Edge rejected the agent: {0}")]
    Rejected(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Tunnel transport error: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for AgentError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AgentError::Transport(e.to_string())
    }
}

/// Errors while replaying a forwarded request against the private service
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Request to private service failed: {0}")]
    Request(#[from] reqwest::Error),
}
