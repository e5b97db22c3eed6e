use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wizlink_protocol::constants::{DEVICE_ANNOUNCE_KIND, DEVICE_HOSTNAME};
use wizlink_protocol::{DeviceAnnouncement, StartupAnnouncement};
use wizlink_socket::{SocketDriver, SocketKind};

use crate::DiscoveryError;
use crate::types::ResponderConfig;

/// Answers device discovery probes on the local network.
///
/// A host tool broadcasts the probe; every node replies with a JSON
/// [`DeviceAnnouncement`] addressed to the sender. On start the node also
/// broadcasts a [`StartupAnnouncement`] to the discovery port.
pub struct Responder<D> {
    driver: Arc<Mutex<D>>,
    config: ResponderConfig,
    ip: Option<Ipv4Addr>,
    subnet: Option<Ipv4Addr>,
    started: bool,
}

impl<D: SocketDriver> Responder<D> {
    pub fn new(driver: Arc<Mutex<D>>, config: ResponderConfig) -> Self {
        Self {
            driver,
            config,
            ip: None,
            subnet: None,
            started: false,
        }
    }

    /// Sets the address announced to probes. Without one the first usable
    /// local interface address is announced.
    pub fn set_ip(&mut self, ip: Ipv4Addr) {
        self.ip = Some(ip);
    }

    /// Sets the mask used to derive the announcement broadcast address.
    pub fn set_subnet(&mut self, subnet: Ipv4Addr) {
        self.subnet = Some(subnet);
    }

    /// Subnet-directed broadcast address (`ip | !subnet`). Falls back to the
    /// limited broadcast address when no subnet is known.
    pub fn broadcast_addr(&self) -> Option<Ipv4Addr> {
        let ip = self.ip?;
        Some(match self.subnet {
            Some(subnet) => Ipv4Addr::from(ip.to_bits() | !subnet.to_bits()),
            None => Ipv4Addr::BROADCAST,
        })
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Builds the announcement sent in reply to a probe.
    pub fn announcement(&self) -> DeviceAnnouncement {
        let ip = self
            .ip
            .or_else(|| get_local_ips().into_iter().next())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        DeviceAnnouncement {
            hostname: self.config.hostname.clone(),
            ip: ip.to_string(),
            device_type: self.config.device_type.clone(),
            version: self.config.version.clone(),
        }
    }

    /// Opens the responder socket and broadcasts the startup announcement.
    ///
    /// Safe to call multiple times: an open socket is closed first.
    pub async fn start(&mut self) -> Result<(), DiscoveryError> {
        if self.config.probe.is_empty() {
            return Err(DiscoveryError::Config("probe must not be empty".into()));
        }

        let mut drv = self.driver.lock().await;
        drv.close(self.config.socket);
        self.started = false;
        drv.open(self.config.socket, SocketKind::Udp, self.config.port)
            .await
            .map_err(DiscoveryError::Open)?;
        self.started = true;
        info!(port = self.config.port, "device discovery responder listening");
        drop(drv);

        if let Err(e) = self.announce().await {
            warn!("startup announcement failed: {e}");
        }
        Ok(())
    }

    /// Broadcasts a [`StartupAnnouncement`] to the discovery port.
    ///
    /// Returns false without sending when the responder is stopped or has
    /// no address yet.
    pub async fn announce(&mut self) -> Result<bool, DiscoveryError> {
        let (true, Some(ip), Some(broadcast)) = (self.started, self.ip, self.broadcast_addr())
        else {
            return Ok(false);
        };

        let message = StartupAnnouncement {
            announce: DEVICE_ANNOUNCE_KIND.into(),
            hostname: self.config.hostname.clone(),
            ip: ip.to_string(),
            device_type: self.config.device_type.clone(),
        };
        let payload = serde_json::to_vec(&message)?;
        let target = SocketAddrV4::new(broadcast, self.config.port);

        self.driver
            .lock()
            .await
            .send_to(self.config.socket, &payload, target)
            .await?;
        debug!(%target, "startup announcement broadcast");
        Ok(true)
    }

    pub async fn stop(&mut self) {
        if self.started {
            self.driver.lock().await.close(self.config.socket);
            self.started = false;
            debug!("device discovery responder stopped");
        }
    }

    /// Re-binds after an address change.
    pub async fn restart(&mut self, ip: Option<Ipv4Addr>) -> Result<(), DiscoveryError> {
        if let Some(ip) = ip {
            self.ip = Some(ip);
        }
        self.stop().await;
        self.start().await
    }

    /// Answers at most one pending probe. Returns true if a reply was sent.
    pub async fn poll_once(&mut self) -> Result<bool, DiscoveryError> {
        if !self.started {
            return Ok(false);
        }

        let mut buf = [0u8; 64];
        let mut drv = self.driver.lock().await;
        let Some((n, from)) = drv
            .recv_from(self.config.socket, &mut buf)
            .map_err(DiscoveryError::Recv)?
        else {
            return Ok(false);
        };

        // Anything after the probe (version suffix, newline) is ignored.
        if !buf[..n].starts_with(&self.config.probe) {
            debug!(%from, bytes = n, "ignoring non-probe datagram");
            return Ok(false);
        }

        let reply = serde_json::to_vec(&self.announcement())?;
        drv.send_to(self.config.socket, &reply, from).await?;
        debug!(%from, "answered discovery probe");
        Ok(true)
    }

    /// Serves probes until `cancel` fires, then closes the socket.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        if !self.started {
            self.start().await?;
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("discovery responder error: {e}");
                    }
                }
            }
        }

        self.stop().await;
        Ok(())
    }
}

/// Returns local non-loopback IPv4 addresses, excluding link-local (169.254.x.x).
pub fn get_local_ips() -> Vec<Ipv4Addr> {
    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return Vec::new();
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_link_local() => Some(ip),
            _ => None,
        })
        .collect()
}

/// Returns the host name, or the default device name when it cannot be read.
pub fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEVICE_HOSTNAME.into())
}
