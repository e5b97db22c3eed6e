//! Adapter for the micro-ROS custom transport callbacks.
//!
//! The XRCE client drives a transport through four calls: open, close,
//! write and read. Write and read report failures through a one-byte error
//! code next to the byte count, so they return `(usize, u8)`.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use wizlink_protocol::{AgentInfo, ErrorCode};
use wizlink_socket::SocketDriver;

use crate::error::TransportError;
use crate::manager::Transport;

/// Read poll cadence while waiting for agent data.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// micro-ROS custom transport on top of a [`Transport`].
pub struct CustomTransport<D> {
    transport: Transport<D>,
    agent: AgentInfo,
}

impl<D: SocketDriver> CustomTransport<D> {
    pub fn new(transport: Transport<D>) -> Self {
        Self {
            transport,
            agent: AgentInfo::unset(),
        }
    }

    pub fn transport(&self) -> &Transport<D> {
        &self.transport
    }

    /// Agent the transport was last opened against.
    pub fn agent(&self) -> AgentInfo {
        self.agent
    }

    /// Opens the link. `args` is a dotted IPv4 agent address; when absent
    /// or empty the agent is discovered.
    pub async fn open(&mut self, args: Option<&str>) -> Result<(), TransportError> {
        let agent_port = self.transport.config().discovery.agent_port;
        let mut agent = match args.map(str::trim).filter(|s| !s.is_empty()) {
            Some(addr) => {
                let ip: Ipv4Addr = addr
                    .parse()
                    .map_err(|_| TransportError::InvalidAgent(addr.to_string()))?;
                info!(agent = %ip, "using configured agent address");
                AgentInfo::new(ip, agent_port)
            }
            None => AgentInfo::unset(),
        };

        if agent.is_unset() {
            self.transport.discover(&mut agent).await?;
        }

        self.transport.connect(&agent).await?;
        self.agent = agent;
        Ok(())
    }

    pub async fn close(&mut self) {
        debug!("custom transport closing");
        self.transport.close().await;
    }

    /// Writes one XRCE message. Returns the bytes written and 0, or 0 and
    /// the failure code.
    pub async fn write(&self, buf: &[u8]) -> (usize, u8) {
        match self.transport.send(buf).await {
            Ok(n) => (n, 0),
            Err(e) => (0, wire_code(e.code())),
        }
    }

    /// Waits up to `timeout` for agent data.
    ///
    /// Returns `(0, 0)` when nothing arrived in time.
    pub async fn read(&self, buf: &mut [u8], timeout: Duration) -> (usize, u8) {
        let deadline = Instant::now() + timeout;
        loop {
            match self.transport.recv(buf).await {
                Ok(0) => {}
                Ok(n) => return (n, 0),
                Err(e) => return (0, wire_code(e.code())),
            }
            if Instant::now() >= deadline {
                return (0, wire_code(ErrorCode::None));
            }
            tokio::time::sleep(READ_POLL_INTERVAL).await;
        }
    }
}

fn wire_code(code: ErrorCode) -> u8 {
    code.as_i8().unsigned_abs()
}
