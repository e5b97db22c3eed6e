use std::fmt;
use std::future::Future;
use std::net::SocketAddrV4;

use wizlink_protocol::SocketId;

use crate::SocketError;

/// Mode a socket is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Udp,
    Tcp,
    /// Raw IP socket carrying the given IP protocol number (1 = ICMP).
    IpRaw { protocol: u8 },
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketKind::Udp => f.write_str("udp"),
            SocketKind::Tcp => f.write_str("tcp"),
            SocketKind::IpRaw { protocol } => write!(f, "ipraw/{protocol}"),
        }
    }
}

/// Socket status register value, reduced to the states callers inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    Closed,
    /// TCP socket opened but not yet connected.
    Init,
    Udp,
    Established,
    /// Peer closed its side of a TCP connection.
    CloseWait,
    IpRaw,
}

/// Operations a socket engine exposes to the services above it.
///
/// Receive calls never block: they report "nothing pending" as `Ok(0)` /
/// `Ok(None)` and callers poll on a timer. Sends may suspend until the
/// engine has accepted the data.
pub trait SocketDriver: Send + 'static {
    /// Opens `id` in `kind` mode bound to `local_port` (0 = engine choice).
    fn open(
        &mut self,
        id: SocketId,
        kind: SocketKind,
        local_port: u16,
    ) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Connects an opened TCP socket.
    fn connect(
        &mut self,
        id: SocketId,
        addr: SocketAddrV4,
    ) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Sends on a connected socket.
    fn send(
        &mut self,
        id: SocketId,
        buf: &[u8],
    ) -> impl Future<Output = Result<usize, SocketError>> + Send;

    /// Sends a datagram to `addr`.
    fn send_to(
        &mut self,
        id: SocketId,
        buf: &[u8],
        addr: SocketAddrV4,
    ) -> impl Future<Output = Result<usize, SocketError>> + Send;

    /// Reads pending stream data; `Ok(0)` when nothing is pending.
    fn recv(&mut self, id: SocketId, buf: &mut [u8]) -> Result<usize, SocketError>;

    /// Reads one pending datagram and its source.
    fn recv_from(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, SocketError>;

    /// Closes `id`. Closing a closed socket is a no-op.
    fn close(&mut self, id: SocketId);

    fn status(&self, id: SocketId) -> SocketStatus;
}
