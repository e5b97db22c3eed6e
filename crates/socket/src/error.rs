//! Error types for the socket layer.

use wizlink_protocol::SocketId;

/// Errors produced by a [`SocketDriver`](crate::SocketDriver).
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("socket {0} is out of range")]
    InvalidSocket(SocketId),

    #[error("socket {0} is not open")]
    NotOpen(SocketId),

    #[error("socket {id} cannot {op} in its current mode")]
    WrongMode { id: SocketId, op: &'static str },

    #[error("{0} sockets are not supported by this driver")]
    Unsupported(&'static str),

    #[error("connection closed by peer")]
    Closed,

    #[error("socket engine rejected the request: {0}")]
    Rejected(String),
}
