//! Scriptable in-memory socket engine.
//!
//! [`MockDriver`] is handed to the code under test; the paired
//! [`MockHandle`] stays with the test to queue inbound datagrams, inject
//! failures and read back what the code did.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use wizlink_protocol::SocketId;
use wizlink_protocol::constants::MAX_SOCKETS;

use crate::driver::{SocketDriver, SocketKind, SocketStatus};
use crate::error::SocketError;

/// One call to [`SocketDriver::open`], successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRecord {
    pub socket: SocketId,
    pub kind: SocketKind,
    pub local_port: u16,
    pub at: Instant,
}

/// One datagram or stream write accepted by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub socket: SocketId,
    pub data: Vec<u8>,
    /// Destination for `send_to`; `None` for connected sends.
    pub to: Option<SocketAddrV4>,
    pub at: Instant,
}

type Responder = Box<dyn FnMut(&SentPacket) -> Option<Vec<u8>> + Send>;

struct Inbound {
    socket: SocketId,
    from: SocketAddrV4,
    data: Vec<u8>,
    ready_at: Instant,
}

struct OpenSocket {
    kind: SocketKind,
    peer: Option<SocketAddrV4>,
}

#[derive(Default)]
struct MockState {
    sockets: HashMap<SocketId, OpenSocket>,
    inbound: Vec<Inbound>,
    fail_next_opens: u32,
    fail_all_opens: bool,
    refuse_connect: bool,
    fail_sends: bool,
    fail_recvs: bool,
    forced_status: HashMap<SocketId, SocketStatus>,
    responder: Option<Responder>,
    opens: Vec<OpenRecord>,
    sent: Vec<SentPacket>,
    closes: usize,
    ops: usize,
}

impl MockState {
    fn check_id(&self, id: SocketId) -> Result<(), SocketError> {
        if id.0 < MAX_SOCKETS {
            Ok(())
        } else {
            Err(SocketError::InvalidSocket(id))
        }
    }

    /// Removes the first datagram for `id` whose time has come.
    fn take_ready(&mut self, id: SocketId) -> Option<Inbound> {
        let now = Instant::now();
        let pos = self
            .inbound
            .iter()
            .position(|p| p.socket == id && p.ready_at <= now)?;
        Some(self.inbound.remove(pos))
    }

    fn record_send(&mut self, id: SocketId, buf: &[u8], to: Option<SocketAddrV4>) {
        let packet = SentPacket {
            socket: id,
            data: buf.to_vec(),
            to,
            at: Instant::now(),
        };
        let reply_from = to.or_else(|| self.sockets.get(&id).and_then(|s| s.peer));
        if let (Some(responder), Some(from)) = (self.responder.as_mut(), reply_from)
            && let Some(data) = responder(&packet)
        {
            self.inbound.push(Inbound {
                socket: id,
                from,
                data,
                ready_at: packet.at,
            });
        }
        self.sent.push(packet);
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory [`SocketDriver`].
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Returns a handle sharing this driver's state.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketDriver for MockDriver {
    async fn open(
        &mut self,
        id: SocketId,
        kind: SocketKind,
        local_port: u16,
    ) -> Result<(), SocketError> {
        let mut st = lock(&self.state);
        st.ops += 1;
        st.check_id(id)?;
        st.opens.push(OpenRecord {
            socket: id,
            kind,
            local_port,
            at: Instant::now(),
        });
        st.sockets.remove(&id);

        if st.fail_all_opens {
            return Err(SocketError::Rejected("open refused".into()));
        }
        if st.fail_next_opens > 0 {
            st.fail_next_opens -= 1;
            return Err(SocketError::Rejected("open refused".into()));
        }

        st.sockets.insert(id, OpenSocket { kind, peer: None });
        Ok(())
    }

    async fn connect(&mut self, id: SocketId, addr: SocketAddrV4) -> Result<(), SocketError> {
        let mut st = lock(&self.state);
        st.ops += 1;
        st.check_id(id)?;
        let refuse = st.refuse_connect;
        let Some(sock) = st.sockets.get_mut(&id) else {
            return Err(SocketError::NotOpen(id));
        };
        if sock.kind != SocketKind::Tcp {
            return Err(SocketError::WrongMode { id, op: "connect" });
        }
        if refuse {
            st.sockets.remove(&id);
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
        }
        sock.peer = Some(addr);
        Ok(())
    }

    async fn send(&mut self, id: SocketId, buf: &[u8]) -> Result<usize, SocketError> {
        let mut st = lock(&self.state);
        st.ops += 1;
        st.check_id(id)?;
        match st.sockets.get(&id) {
            Some(sock) if sock.peer.is_some() => {}
            Some(_) => return Err(SocketError::WrongMode { id, op: "send" }),
            None => return Err(SocketError::NotOpen(id)),
        }
        if st.fail_sends {
            return Err(SocketError::Rejected("send refused".into()));
        }
        st.record_send(id, buf, None);
        Ok(buf.len())
    }

    async fn send_to(
        &mut self,
        id: SocketId,
        buf: &[u8],
        addr: SocketAddrV4,
    ) -> Result<usize, SocketError> {
        let mut st = lock(&self.state);
        st.ops += 1;
        st.check_id(id)?;
        match st.sockets.get(&id) {
            Some(sock) if sock.kind != SocketKind::Tcp => {}
            Some(_) => return Err(SocketError::WrongMode { id, op: "send_to" }),
            None => return Err(SocketError::NotOpen(id)),
        }
        if st.fail_sends {
            return Err(SocketError::Rejected("send refused".into()));
        }
        st.record_send(id, buf, Some(addr));
        Ok(buf.len())
    }

    fn recv(&mut self, id: SocketId, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.recv_from(id, buf)
            .map(|got| got.map_or(0, |(n, _)| n))
    }

    fn recv_from(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
    ) -> Result<Option<(usize, SocketAddrV4)>, SocketError> {
        let mut st = lock(&self.state);
        st.ops += 1;
        st.check_id(id)?;
        if !st.sockets.contains_key(&id) {
            return Err(SocketError::NotOpen(id));
        }
        if st.fail_recvs {
            return Err(SocketError::Rejected("receive failed".into()));
        }
        let Some(packet) = st.take_ready(id) else {
            return Ok(None);
        };
        // Datagrams longer than the buffer are truncated.
        let n = packet.data.len().min(buf.len());
        buf[..n].copy_from_slice(&packet.data[..n]);
        Ok(Some((n, packet.from)))
    }

    fn close(&mut self, id: SocketId) {
        let mut st = lock(&self.state);
        st.ops += 1;
        if st.sockets.remove(&id).is_some() {
            st.closes += 1;
        }
    }

    fn status(&self, id: SocketId) -> SocketStatus {
        let mut st = lock(&self.state);
        st.ops += 1;
        if let Some(forced) = st.forced_status.get(&id) {
            return *forced;
        }
        match st.sockets.get(&id) {
            None => SocketStatus::Closed,
            Some(OpenSocket {
                kind: SocketKind::Udp,
                ..
            }) => SocketStatus::Udp,
            Some(OpenSocket {
                kind: SocketKind::Tcp,
                peer,
            }) => {
                if peer.is_some() {
                    SocketStatus::Established
                } else {
                    SocketStatus::Init
                }
            }
            Some(OpenSocket {
                kind: SocketKind::IpRaw { .. },
                ..
            }) => SocketStatus::IpRaw,
        }
    }
}

/// Test-side view of a [`MockDriver`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// Queues a datagram for `socket`, readable immediately.
    pub fn deliver(&self, socket: SocketId, from: SocketAddrV4, data: impl Into<Vec<u8>>) {
        self.deliver_after(socket, from, data, Duration::ZERO);
    }

    /// Queues a datagram for `socket`, readable once `delay` has elapsed.
    pub fn deliver_after(
        &self,
        socket: SocketId,
        from: SocketAddrV4,
        data: impl Into<Vec<u8>>,
        delay: Duration,
    ) {
        self.lock().inbound.push(Inbound {
            socket,
            from,
            data: data.into(),
            ready_at: Instant::now() + delay,
        });
    }

    /// Makes the next `n` opens fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_next_opens = n;
    }

    pub fn fail_opens(&self, fail: bool) {
        self.lock().fail_all_opens = fail;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn fail_recvs(&self, fail: bool) {
        self.lock().fail_recvs = fail;
    }

    /// Overrides the status reported for `socket`; `None` clears it.
    pub fn force_status(&self, socket: SocketId, status: Option<SocketStatus>) {
        let mut st = self.lock();
        match status {
            Some(status) => st.forced_status.insert(socket, status),
            None => st.forced_status.remove(&socket),
        };
    }

    /// Installs a peer that answers every send. A returned payload is queued
    /// on the sending socket as coming from the send's destination.
    pub fn on_send<F>(&self, f: F)
    where
        F: FnMut(&SentPacket) -> Option<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(f));
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.lock().opens.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens.len()
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.lock().sent.clone()
    }

    /// Number of closes that actually released an open socket.
    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    /// Total driver calls of any kind.
    pub fn op_count(&self) -> usize {
        self.lock().ops
    }

    pub fn is_open(&self, socket: SocketId) -> bool {
        self.lock().sockets.contains_key(&socket)
    }

    /// Datagrams still queued for `socket`, ready or not.
    pub fn pending(&self, socket: SocketId) -> usize {
        self.lock()
            .inbound
            .iter()
            .filter(|p| p.socket == socket)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SN: SocketId = SocketId(4);

    fn peer() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 8888)
    }

    #[tokio::test]
    async fn delivers_queued_datagram() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        handle.deliver(SN, peer(), b"uros-agent".to_vec());

        driver.open(SN, SocketKind::Udp, 8888).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = driver.recv_from(SN, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"uros-agent");
        assert_eq!(from, peer());
        assert!(driver.recv_from(SN, &mut buf).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_datagram_waits_for_clock() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        driver.open(SN, SocketKind::Udp, 0).await.unwrap();
        handle.deliver_after(SN, peer(), b"late".to_vec(), Duration::from_millis(300));

        let mut buf = [0u8; 8];
        assert!(driver.recv_from(SN, &mut buf).unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(driver.recv_from(SN, &mut buf).unwrap().is_some());
    }

    #[tokio::test]
    async fn scripted_open_failures() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        handle.fail_next_opens(2);

        assert!(driver.open(SN, SocketKind::Udp, 0).await.is_err());
        assert!(driver.open(SN, SocketKind::Udp, 0).await.is_err());
        assert!(driver.open(SN, SocketKind::Udp, 0).await.is_ok());
        assert_eq!(handle.open_count(), 3);
        assert!(handle.is_open(SN));
    }

    #[tokio::test]
    async fn records_sends_and_closes() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        driver.open(SN, SocketKind::Udp, 0).await.unwrap();
        driver.send_to(SN, b"abc", peer()).await.unwrap();
        driver.close(SN);
        driver.close(SN);

        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data, b"abc");
        assert_eq!(sent[0].to, Some(peer()));
        assert_eq!(handle.close_count(), 1);
        assert_eq!(driver.status(SN), SocketStatus::Closed);
    }

    #[tokio::test]
    async fn responder_answers_sends() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        handle.on_send(|p| Some(p.data.iter().rev().copied().collect()));

        driver.open(SN, SocketKind::Udp, 0).await.unwrap();
        driver.send_to(SN, b"ping", peer()).await.unwrap();
        let mut buf = [0u8; 8];
        let (n, from) = driver.recv_from(SN, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"gnip");
        assert_eq!(from, peer());
    }

    #[tokio::test]
    async fn tcp_connect_can_be_refused() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        handle.refuse_connect(true);

        driver.open(SN, SocketKind::Tcp, 0).await.unwrap();
        assert_eq!(driver.status(SN), SocketStatus::Init);
        assert!(driver.connect(SN, peer()).await.is_err());
        assert!(!handle.is_open(SN));

        handle.refuse_connect(false);
        driver.open(SN, SocketKind::Tcp, 0).await.unwrap();
        driver.connect(SN, peer()).await.unwrap();
        assert_eq!(driver.status(SN), SocketStatus::Established);
        assert_eq!(driver.send(SN, b"xy").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn forced_status_overrides() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        driver.open(SN, SocketKind::Udp, 0).await.unwrap();
        handle.force_status(SN, Some(SocketStatus::Closed));
        assert_eq!(driver.status(SN), SocketStatus::Closed);
        handle.force_status(SN, None);
        assert_eq!(driver.status(SN), SocketStatus::Udp);
    }

    #[tokio::test]
    async fn every_call_is_counted() {
        let mut driver = MockDriver::new();
        let handle = driver.handle();
        assert_eq!(handle.op_count(), 0);
        driver.open(SN, SocketKind::Udp, 0).await.unwrap();
        let mut buf = [0u8; 4];
        let _ = driver.recv_from(SN, &mut buf);
        let _ = driver.status(SN);
        assert_eq!(handle.op_count(), 3);
    }
}
