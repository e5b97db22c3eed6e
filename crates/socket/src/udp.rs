//! Host socket driver backed by tokio.
//!
//! Gives each hardware socket number a slot holding a real OS socket, so
//! the transport and discovery code can run unchanged on a workstation.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::{debug, trace};

use wizlink_protocol::SocketId;
use wizlink_protocol::constants::MAX_SOCKETS;

use crate::driver::{SocketDriver, SocketKind, SocketStatus};
use crate::error::SocketError;

enum Slot {
    Udp(UdpSocket),
    TcpInit(TcpSocket),
    Tcp { stream: TcpStream, peer_closed: bool },
}

/// [`SocketDriver`] over tokio UDP/TCP sockets.
///
/// UDP sockets are opened with broadcast enabled. Raw IP sockets need
/// elevated privileges on most hosts and are not offered.
pub struct UdpDriver {
    slots: [Option<Slot>; MAX_SOCKETS as usize],
}

impl UdpDriver {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Returns the OS address bound to `id`, if it is open.
    pub fn local_addr(&self, id: SocketId) -> Option<SocketAddr> {
        match self.slots.get(id.0 as usize)?.as_ref()? {
            Slot::Udp(sock) => sock.local_addr().ok(),
            Slot::TcpInit(sock) => sock.local_addr().ok(),
            Slot::Tcp { stream, .. } => stream.local_addr().ok(),
        }
    }

    fn slot_mut(&mut self, id: SocketId) -> Result<&mut Option<Slot>, SocketError> {
        self.slots
            .get_mut(id.0 as usize)
            .ok_or(SocketError::InvalidSocket(id))
    }
}

impl Default for UdpDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn bind_addr(local_port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port))
}

impl SocketDriver for UdpDriver {
    async fn open(
        &mut self,
        id: SocketId,
        kind: SocketKind,
        local_port: u16,
    ) -> Result<(), SocketError> {
        let slot = self.slot_mut(id)?;
        // Reopening discards whatever was there, like the chip does.
        *slot = None;

        let opened = match kind {
            SocketKind::Udp => {
                let sock = UdpSocket::bind(bind_addr(local_port)).await?;
                sock.set_broadcast(true)?;
                Slot::Udp(sock)
            }
            SocketKind::Tcp => {
                let sock = TcpSocket::new_v4()?;
                sock.set_reuseaddr(true)?;
                sock.bind(bind_addr(local_port))?;
                Slot::TcpInit(sock)
            }
            SocketKind::IpRaw { .. } => return Err(SocketError::Unsupported("raw IP")),
        };

        debug!(socket = %id, %kind, local_port, "socket opened");
        *slot = Some(opened);
        Ok(())
    }

    async fn connect(&mut self, id: SocketId, addr: SocketAddrV4) -> Result<(), SocketError> {
        let slot = self.slot_mut(id)?;
        match slot.take() {
            Some(Slot::TcpInit(sock)) => {
                // A failed connect leaves the socket closed.
                let stream = sock.connect(SocketAddr::V4(addr)).await?;
                stream.set_nodelay(true)?;
                debug!(socket = %id, %addr, "tcp connected");
                *slot = Some(Slot::Tcp {
                    stream,
                    peer_closed: false,
                });
                Ok(())
            }
            Some(other) => {
                *slot = Some(other);
                Err(SocketError::WrongMode { id, op: "connect" })
            }
            None => Err(SocketError::NotOpen(id)),
        }
    }

    async fn send(&mut self, id: SocketId, buf: &[u8]) -> Result<usize, SocketError> {
        match self.slot_mut(id)?.as_mut() {
            Some(Slot::Tcp { stream, .. }) => Ok(stream.write(buf).await?),
            Some(_) => Err(SocketError::WrongMode { id, op: "send" }),
            None => Err(SocketError::NotOpen(id)),
        }
    }

    async fn send_to(
        &mut self,
        id: SocketId,
        buf: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, SocketError> {
        match self.slot_mut(id)?.as_mut() {
            Some(Slot::Udp(sock)) => {
                let n = sock.send_to(buf, SocketAddr::V4(addr)).await?;
                trace!(socket = %id, %addr, bytes = n, "datagram sent");
                Ok(n)
            }
            Some(_) => Err(SocketError::WrongMode { id, op: "send_to" }),
            None => Err(SocketError::NotOpen(id)),
        }
    }

    fn recv(&mut self, id: SocketId, buf: &mut [u8]) -> Result<usize, SocketError> {
        match self.slot_mut(id)?.as_mut() {
            Some(Slot::Tcp {
                stream,
                peer_closed,
            }) => match stream.try_read(buf) {
                Ok(0) if !buf.is_empty() => {
                    *peer_closed = true;
                    Err(SocketError::Closed)
                }
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e.into()),
            },
            Some(_) => Err(SocketError::WrongMode { id, op: "recv" }),
            None => Err(SocketError::NotOpen(id)),
        }
    }

    fn recv_from(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, SocketError> {
        match self.slot_mut(id)?.as_mut() {
            Some(Slot::Udp(sock)) => match sock.try_recv_from(buf) {
                Ok((n, SocketAddr::V4(from))) => Ok(Some((n, from))),
                // IPv6 peers cannot exist on the chip; drop them.
                Ok((_, SocketAddr::V6(_))) => Ok(None),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e.into()),
            },
            Some(_) => Err(SocketError::WrongMode { id, op: "recv_from" }),
            None => Err(SocketError::NotOpen(id)),
        }
    }

    fn close(&mut self, id: SocketId) {
        if let Ok(slot) = self.slot_mut(id)
            && slot.take().is_some()
        {
            debug!(socket = %id, "socket closed");
        }
    }

    fn status(&self, id: SocketId) -> SocketStatus {
        match self.slots.get(id.0 as usize).and_then(Option::as_ref) {
            None => SocketStatus::Closed,
            Some(Slot::Udp(_)) => SocketStatus::Udp,
            Some(Slot::TcpInit(_)) => SocketStatus::Init,
            Some(Slot::Tcp { peer_closed, .. }) => {
                if *peer_closed {
                    SocketStatus::CloseWait
                } else {
                    SocketStatus::Established
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn udp_loopback_roundtrip() {
        let mut driver = UdpDriver::new();
        let a = SocketId(0);
        let b = SocketId(1);
        driver.open(a, SocketKind::Udp, 0).await.unwrap();
        driver.open(b, SocketKind::Udp, 0).await.unwrap();

        let port_b = driver.local_addr(b).unwrap().port();
        let target = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port_b);
        let sent = driver.send_to(a, b"hello", target).await.unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 32];
        let received = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(got) = driver.recv_from(b, &mut buf).unwrap() {
                    break got;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("datagram should arrive");

        assert_eq!(&buf[..received.0], b"hello");
        assert_eq!(received.1.ip(), &Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn status_follows_lifecycle() {
        let mut driver = UdpDriver::new();
        let id = SocketId(4);
        assert_eq!(driver.status(id), SocketStatus::Closed);

        driver.open(id, SocketKind::Udp, 0).await.unwrap();
        assert_eq!(driver.status(id), SocketStatus::Udp);

        driver.close(id);
        assert_eq!(driver.status(id), SocketStatus::Closed);
        // Second close is a no-op.
        driver.close(id);
    }

    #[tokio::test]
    async fn recv_from_empty_is_none() {
        let mut driver = UdpDriver::new();
        let id = SocketId(2);
        driver.open(id, SocketKind::Udp, 0).await.unwrap();
        let mut buf = [0u8; 8];
        assert!(driver.recv_from(id, &mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_socket_operations_fail() {
        let mut driver = UdpDriver::new();
        let id = SocketId(3);
        let mut buf = [0u8; 8];
        assert!(matches!(
            driver.recv_from(id, &mut buf),
            Err(SocketError::NotOpen(_))
        ));
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 9);
        assert!(matches!(
            driver.send_to(id, b"x", addr).await,
            Err(SocketError::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_socket_rejected() {
        let mut driver = UdpDriver::new();
        let result = driver.open(SocketId(9), SocketKind::Udp, 0).await;
        assert!(matches!(result, Err(SocketError::InvalidSocket(_))));
    }

    #[tokio::test]
    async fn raw_ip_is_unsupported() {
        let mut driver = UdpDriver::new();
        let result = driver
            .open(SocketId(1), SocketKind::IpRaw { protocol: 1 }, 0)
            .await;
        assert!(matches!(result, Err(SocketError::Unsupported(_))));
        assert_eq!(driver.status(SocketId(1)), SocketStatus::Closed);
    }

    #[tokio::test]
    async fn tcp_connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut driver = UdpDriver::new();
        let id = SocketId(4);
        driver.open(id, SocketKind::Tcp, 0).await.unwrap();
        assert_eq!(driver.status(id), SocketStatus::Init);

        let (accepted, connected) = tokio::join!(
            listener.accept(),
            driver.connect(id, SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
        );
        connected.unwrap();
        let _peer = accepted.unwrap();
        assert_eq!(driver.status(id), SocketStatus::Established);
    }
}
