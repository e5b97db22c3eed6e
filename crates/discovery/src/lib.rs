pub mod client;
pub mod server;
pub mod types;

use std::time::Duration;

use wizlink_socket::SocketError;

// Re-export primary types.
pub use client::discover_agent;
pub use server::{Responder, get_hostname, get_local_ips};
pub use types::{DiscoveryConfig, ResponderConfig};

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no agent answered within {0:?}")]
    Timeout(Duration),

    #[error("failed to open discovery socket: {0}")]
    Open(#[source] SocketError),

    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("receive failed: {0}")]
    Recv(#[source] SocketError),

    #[error("announcement encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
