use wizlink_discovery::DiscoveryError;
use wizlink_protocol::{AgentInfo, ErrorCode};
use wizlink_socket::SocketError;

/// Errors returned by transport operations.
///
/// Every variant maps onto the [`ErrorCode`] recorded in the link
/// statistics.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] SocketError),

    #[error("no socket is open")]
    NotConnected,

    #[error("no agent address to connect to")]
    NoAgent,

    #[error("invalid agent address '{0}'")]
    InvalidAgent(String),

    #[error("connect to {agent} failed: {source}")]
    Connect {
        agent: AgentInfo,
        #[source]
        source: SocketError,
    },

    #[error("send failed: {0}")]
    Send(#[source] SocketError),

    #[error("receive failed: {0}")]
    Recv(#[source] SocketError),

    #[error("socket closed")]
    Closed,

    #[error("agent discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("reconnect gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

impl TransportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TransportError::SocketCreate(_) => ErrorCode::SocketCreate,
            TransportError::NotConnected
            | TransportError::NoAgent
            | TransportError::InvalidAgent(_)
            | TransportError::Connect { .. }
            | TransportError::RetriesExhausted { .. } => ErrorCode::NotConnected,
            TransportError::Send(_) => ErrorCode::Send,
            TransportError::Recv(_) => ErrorCode::Recv,
            TransportError::Closed => ErrorCode::Closed,
            TransportError::Discovery(e) => match e {
                DiscoveryError::Timeout(_) => ErrorCode::Timeout,
                DiscoveryError::Open(_) => ErrorCode::SocketCreate,
                DiscoveryError::Socket(_) => ErrorCode::Send,
                DiscoveryError::Recv(_) => ErrorCode::Recv,
                DiscoveryError::Json(_) | DiscoveryError::Config(_) => ErrorCode::NotConnected,
            },
        }
    }
}
