//! Edge server errors

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
