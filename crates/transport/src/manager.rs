//! Connection manager for the micro-ROS agent link.
//!
//! Owns at most one socket towards the agent, tracks link state and
//! counters, and exposes the primitive operations the reconnect and
//! heartbeat logic build on.

use std::net::SocketAddrV4;
use std::sync::{Arc, MutexGuard, PoisonError};

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use wizlink_discovery::discover_agent;
use wizlink_protocol::{AgentInfo, ErrorCode};
use wizlink_socket::{SocketDriver, SocketError, SocketKind, SocketStatus};

use crate::error::TransportError;
use crate::types::{
    ConnectionState, ConnectionStats, TransportConfig, TransportEvent, TransportMode,
};

/// Capacity of the event channel; events beyond it are dropped.
const EVENT_CAPACITY: usize = 64;

/// The socket currently owned by the transport.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub(crate) peer: SocketAddrV4,
    pub(crate) connected_at: Instant,
}

/// Everything behind the state lock.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) stats: ConnectionStats,
    pub(crate) link: Option<Link>,
    pub(crate) last_heartbeat: Option<Instant>,
}

pub(crate) struct Inner<D> {
    pub(crate) config: TransportConfig,
    /// Socket lock. Always taken before the state lock.
    pub(crate) driver: Arc<Mutex<D>>,
    pub(crate) shared: std::sync::Mutex<Shared>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

/// Handle to the agent transport. Clones share the same link.
pub struct Transport<D> {
    pub(crate) inner: Arc<Inner<D>>,
}

impl<D> Clone for Transport<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: SocketDriver> Transport<D> {
    /// Creates a disconnected transport that owns `driver`.
    pub fn new(driver: D, config: TransportConfig) -> Self {
        Self::with_shared_driver(Arc::new(Mutex::new(driver)), config)
    }

    /// Creates a transport on a socket engine shared with other services.
    pub fn with_shared_driver(driver: Arc<Mutex<D>>, config: TransportConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                driver,
                shared: std::sync::Mutex::new(Shared::default()),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.inner.events_rx.lock().await.take()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Returns the socket engine for services sharing it.
    pub fn driver(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.inner.driver)
    }

    /// Returns a snapshot of the link statistics.
    pub fn stats(&self) -> ConnectionStats {
        self.shared().stats.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().stats.state
    }

    pub fn is_connected(&self) -> bool {
        self.shared().link.is_some()
    }

    /// Searches for an agent and writes it into `agent`.
    ///
    /// Any owned socket is closed first; the search borrows the transport's
    /// socket number.
    pub async fn discover(&self, agent: &mut AgentInfo) -> Result<(), TransportError> {
        {
            let mut drv = self.inner.driver.lock().await;
            let mut shared = self.shared();
            self.release(&mut drv, &mut shared);
            self.set_state(&mut shared, ConnectionState::Disconnected);
        }

        match discover_agent(&self.inner.driver, &self.inner.config.discovery).await {
            Ok(found) => {
                *agent = found;
                self.emit(TransportEvent::AgentDiscovered(found));
                Ok(())
            }
            Err(e) => {
                let err = TransportError::from(e);
                self.shared().stats.last_error = err.code();
                Err(err)
            }
        }
    }

    /// Opens a socket towards `agent`, replacing any socket already owned.
    pub async fn connect(&self, agent: &AgentInfo) -> Result<(), TransportError> {
        let config = &self.inner.config;
        let mut drv = self.inner.driver.lock().await;
        {
            let mut shared = self.shared();
            self.release(&mut drv, &mut shared);
            self.set_state(&mut shared, ConnectionState::Connecting);
        }

        if agent.is_unset() {
            self.fail(ErrorCode::NotConnected);
            return Err(TransportError::NoAgent);
        }

        let kind = match config.mode {
            TransportMode::Udp => SocketKind::Udp,
            TransportMode::Tcp => SocketKind::Tcp,
        };
        if let Err(e) = drv.open(config.socket, kind, config.local_port).await {
            warn!(socket = %config.socket, error = %e, "socket creation failed");
            self.fail(ErrorCode::SocketCreate);
            return Err(TransportError::SocketCreate(e));
        }

        if config.mode == TransportMode::Tcp
            && let Err(e) = drv.connect(config.socket, agent.socket_addr()).await
        {
            drv.close(config.socket);
            warn!(%agent, error = %e, "tcp connect failed");
            self.fail(ErrorCode::NotConnected);
            return Err(TransportError::Connect {
                agent: *agent,
                source: e,
            });
        }

        let mut shared = self.shared();
        shared.link = Some(Link {
            peer: agent.socket_addr(),
            connected_at: Instant::now(),
        });
        shared.stats.last_error = ErrorCode::None;
        self.set_state(&mut shared, ConnectionState::Connected);
        info!(%agent, mode = ?config.mode, "connected to agent");
        Ok(())
    }

    /// Sends `buf` to the agent.
    pub async fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let config = &self.inner.config;
        let mut drv = self.inner.driver.lock().await;
        let link = self.shared().link;
        let Some(link) = link else {
            debug!("send without a socket");
            self.shared().stats.last_error = ErrorCode::NotConnected;
            return Err(TransportError::NotConnected);
        };

        let result = match config.mode {
            TransportMode::Udp => drv.send_to(config.socket, buf, link.peer).await,
            TransportMode::Tcp => drv.send(config.socket, buf).await,
        };

        let mut shared = self.shared();
        match result {
            Ok(n) => {
                if n > 0 {
                    shared.stats.bytes_sent += n as u64;
                    shared.stats.last_activity = Some(Instant::now());
                    self.set_state(&mut shared, ConnectionState::Connected);
                }
                Ok(n)
            }
            Err(e) => {
                debug!(error = %e, "send failed");
                shared.stats.last_error = ErrorCode::Send;
                self.set_state(&mut shared, ConnectionState::Error);
                Err(TransportError::Send(e))
            }
        }
    }

    /// Reads pending data from the agent. Returns `Ok(0)` when nothing is
    /// waiting.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let config = &self.inner.config;
        let mut drv = self.inner.driver.lock().await;
        let link = self.shared().link;
        let Some(link) = link else {
            debug!("receive without a socket");
            self.shared().stats.last_error = ErrorCode::NotConnected;
            return Err(TransportError::NotConnected);
        };

        let result = match config.mode {
            TransportMode::Udp => drv.recv_from(config.socket, buf).map(|got| {
                got.map_or(0, |(n, from)| {
                    if from != link.peer {
                        debug!(%from, agent = %link.peer, "datagram from non-agent source");
                    }
                    n
                })
            }),
            TransportMode::Tcp => drv.recv(config.socket, buf),
        };

        let mut shared = self.shared();
        match result {
            Ok(n) => {
                if n > 0 {
                    shared.stats.bytes_received += n as u64;
                    shared.stats.last_activity = Some(Instant::now());
                    self.set_state(&mut shared, ConnectionState::Connected);
                }
                Ok(n)
            }
            Err(SocketError::Closed) => {
                warn!(agent = %link.peer, "agent closed the connection");
                self.release(&mut drv, &mut shared);
                shared.stats.last_error = ErrorCode::Closed;
                self.set_state(&mut shared, ConnectionState::Error);
                Err(TransportError::Closed)
            }
            Err(e) => {
                debug!(error = %e, "receive failed");
                shared.stats.last_error = ErrorCode::Recv;
                self.set_state(&mut shared, ConnectionState::Error);
                Err(TransportError::Recv(e))
            }
        }
    }

    /// Checks that the owned socket is still in the expected mode.
    ///
    /// A socket found in any other state is dropped and the link goes to
    /// [`ConnectionState::Error`].
    pub async fn status(&self) -> bool {
        let config = &self.inner.config;
        let mut drv = self.inner.driver.lock().await;
        let mut shared = self.shared();
        if shared.link.is_none() {
            return false;
        }

        let expected = match config.mode {
            TransportMode::Udp => SocketStatus::Udp,
            TransportMode::Tcp => SocketStatus::Established,
        };
        let status = drv.status(config.socket);
        if status == expected {
            return true;
        }

        warn!(socket = %config.socket, ?status, "socket lost");
        self.release(&mut drv, &mut shared);
        shared.stats.last_error = ErrorCode::Closed;
        self.set_state(&mut shared, ConnectionState::Error);
        false
    }

    /// Closes the owned socket. Safe to call when nothing is open.
    pub async fn close(&self) {
        let mut drv = self.inner.driver.lock().await;
        let mut shared = self.shared();
        self.release(&mut drv, &mut shared);
        self.set_state(&mut shared, ConnectionState::Disconnected);
    }

    // -- internals --

    pub(crate) fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Closes the owned socket, if any. Requires both locks.
    fn release(&self, drv: &mut D, shared: &mut Shared) {
        if shared.link.take().is_some() {
            drv.close(self.inner.config.socket);
            debug!(socket = %self.inner.config.socket, "socket closed");
        }
    }

    fn fail(&self, code: ErrorCode) {
        let mut shared = self.shared();
        shared.stats.last_error = code;
        self.set_state(&mut shared, ConnectionState::Error);
    }

    pub(crate) fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.stats.state != state {
            debug!(from = %shared.stats.state, to = %state, "link state changed");
            shared.stats.state = state;
            self.emit(TransportEvent::StateChanged(state));
        }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if let Err(e) = self.inner.events_tx.try_send(event) {
            debug!("dropping transport event: {e}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use wizlink_protocol::constants::UROS_SOCKET;
    use wizlink_socket::mock::{MockDriver, MockHandle};

    pub(crate) fn setup(config: TransportConfig) -> (Transport<MockDriver>, MockHandle) {
        let driver = MockDriver::new();
        let handle = driver.handle();
        (Transport::new(driver, config), handle)
    }

    pub(crate) fn agent() -> AgentInfo {
        AgentInfo::new(Ipv4Addr::new(192, 168, 1, 50), 8888)
    }

    #[tokio::test]
    async fn starts_disconnected_with_zeroed_stats() {
        let (transport, _) = setup(TransportConfig::default());
        assert_eq!(transport.stats(), ConnectionStats::default());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn connect_opens_udp_socket() {
        let (transport, handle) = setup(TransportConfig::default());
        transport.connect(&agent()).await.unwrap();

        assert_eq!(transport.state(), ConnectionState::Connected);
        assert_eq!(transport.stats().last_error, ErrorCode::None);
        let opens = handle.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].socket, UROS_SOCKET);
        assert_eq!(opens[0].kind, SocketKind::Udp);
        assert_eq!(opens[0].local_port, 8888);
        // Connecting does not count as activity.
        assert_eq!(transport.stats().last_activity, None);
    }

    #[tokio::test]
    async fn connect_closes_previous_socket() {
        let (transport, handle) = setup(TransportConfig::default());
        transport.connect(&agent()).await.unwrap();
        transport.connect(&agent()).await.unwrap();

        assert_eq!(handle.open_count(), 2);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn connect_socket_failure_records_error() {
        let (transport, handle) = setup(TransportConfig::default());
        handle.fail_next_opens(1);

        let err = transport.connect(&agent()).await.unwrap_err();
        assert!(matches!(err, TransportError::SocketCreate(_)));
        let stats = transport.stats();
        assert_eq!(stats.state, ConnectionState::Error);
        assert_eq!(stats.last_error, ErrorCode::SocketCreate);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn connect_to_unset_agent_fails() {
        let (transport, handle) = setup(TransportConfig::default());
        let err = transport.connect(&AgentInfo::unset()).await.unwrap_err();
        assert!(matches!(err, TransportError::NoAgent));
        assert_eq!(handle.open_count(), 0);
    }

    #[tokio::test]
    async fn tcp_refusal_closes_socket() {
        let config = TransportConfig {
            mode: TransportMode::Tcp,
            ..TransportConfig::default()
        };
        let (transport, handle) = setup(config);
        handle.refuse_connect(true);

        let err = transport.connect(&agent()).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(transport.stats().last_error, ErrorCode::NotConnected);
        assert_eq!(transport.state(), ConnectionState::Error);
        assert!(!handle.is_open(UROS_SOCKET));
    }

    #[tokio::test]
    async fn tcp_send_and_status() {
        let config = TransportConfig {
            mode: TransportMode::Tcp,
            ..TransportConfig::default()
        };
        let (transport, handle) = setup(config);
        transport.connect(&agent()).await.unwrap();

        assert_eq!(transport.send(b"abc").await.unwrap(), 3);
        assert_eq!(handle.sent()[0].to, None);
        assert!(transport.status().await);
    }

    #[tokio::test]
    async fn send_goes_to_agent() {
        let (transport, handle) = setup(TransportConfig::default());
        transport.connect(&agent()).await.unwrap();

        assert_eq!(transport.send(b"xrce").await.unwrap(), 4);
        let sent = handle.sent();
        assert_eq!(sent[0].to, Some(agent().socket_addr()));
        assert_eq!(sent[0].data, b"xrce");
    }

    #[tokio::test]
    async fn send_without_socket_is_not_connected() {
        let (transport, handle) = setup(TransportConfig::default());

        let err = transport.send(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        let stats = transport.stats();
        assert_eq!(stats.last_error, ErrorCode::NotConnected);
        // State is left alone.
        assert_eq!(stats.state, ConnectionState::Disconnected);
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn recv_without_socket_is_not_connected() {
        let (transport, _) = setup(TransportConfig::default());
        let mut buf = [0u8; 8];
        let err = transport.recv(&mut buf).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConnected);
    }

    #[tokio::test]
    async fn counters_track_successful_io_only() {
        let (transport, handle) = setup(TransportConfig::default());
        transport.connect(&agent()).await.unwrap();

        transport.send(&[0u8; 10]).await.unwrap();
        transport.send(&[0u8; 5]).await.unwrap();
        assert_eq!(transport.stats().bytes_sent, 15);

        handle.fail_sends(true);
        assert!(transport.send(&[0u8; 7]).await.is_err());
        let stats = transport.stats();
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.last_error, ErrorCode::Send);
        assert_eq!(stats.state, ConnectionState::Error);

        handle.fail_sends(false);
        transport.send(&[0u8; 1]).await.unwrap();
        let stats = transport.stats();
        assert_eq!(stats.bytes_sent, 16);
        assert_eq!(stats.state, ConnectionState::Connected);

        handle.deliver(UROS_SOCKET, agent().socket_addr(), vec![1u8; 12]);
        let mut buf = [0u8; 64];
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 12);
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 0);
        assert_eq!(transport.stats().bytes_received, 12);

        handle.fail_recvs(true);
        assert!(transport.recv(&mut buf).await.is_err());
        let stats = transport.stats();
        assert_eq!(stats.bytes_received, 12);
        assert_eq!(stats.last_error, ErrorCode::Recv);
        assert!(stats.last_activity.is_some());
    }

    #[tokio::test]
    async fn recv_accepts_non_agent_source() {
        let (transport, handle) = setup(TransportConfig::default());
        transport.connect(&agent()).await.unwrap();
        let stranger = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 1234);
        handle.deliver(UROS_SOCKET, stranger, b"hi".to_vec());

        let mut buf = [0u8; 8];
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn status_detects_lost_socket() {
        let (transport, handle) = setup(TransportConfig::default());
        assert!(!transport.status().await);

        transport.connect(&agent()).await.unwrap();
        assert!(transport.status().await);

        handle.force_status(UROS_SOCKET, Some(SocketStatus::Closed));
        assert!(!transport.status().await);
        let stats = transport.stats();
        assert_eq!(stats.state, ConnectionState::Error);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, handle) = setup(TransportConfig::default());
        transport.connect(&agent()).await.unwrap();
        transport.close().await;
        transport.close().await;

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(handle.close_count(), 1);
        assert!(!handle.is_open(UROS_SOCKET));
    }

    #[tokio::test]
    async fn emits_state_changes() {
        let (transport, _) = setup(TransportConfig::default());
        let mut events = transport.take_events().await.unwrap();
        assert!(transport.take_events().await.is_none());

        transport.connect(&agent()).await.unwrap();
        transport.close().await;

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            seen.push(ev);
        }
        assert_eq!(
            seen,
            vec![
                TransportEvent::StateChanged(ConnectionState::Connecting),
                TransportEvent::StateChanged(ConnectionState::Connected),
                TransportEvent::StateChanged(ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn discover_fills_agent() {
        let (transport, handle) = setup(TransportConfig::default());
        handle.deliver(
            UROS_SOCKET,
            SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 8888),
            b"uros-agent".to_vec(),
        );

        let mut found = AgentInfo::unset();
        transport.discover(&mut found).await.unwrap();
        assert_eq!(found, agent());
        assert!(!handle.is_open(UROS_SOCKET));
    }

    #[tokio::test(start_paused = true)]
    async fn discover_timeout_records_error() {
        let (transport, _) = setup(TransportConfig::default());
        let mut found = AgentInfo::unset();

        let err = transport.discover(&mut found).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(transport.stats().last_error, ErrorCode::Timeout);
        assert!(found.is_unset());
    }
}
