use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_AGENT_IP, UROS_AGENT_PORT};

/// Hardware socket number on the Ethernet controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(pub u8);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sn{}", self.0)
    }
}

/// Address of the micro-ROS agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl AgentInfo {
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// An agent whose address still has to be discovered.
    pub const fn unset() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            port: 0,
        }
    }

    /// Hardcoded agent used when discovery finds nothing.
    pub const fn fallback() -> Self {
        Self {
            ip: DEFAULT_AGENT_IP,
            port: UROS_AGENT_PORT,
        }
    }

    /// Returns true when the IP is all-zero.
    pub fn is_unset(&self) -> bool {
        self.ip.is_unspecified()
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Display for AgentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddrV4> for AgentInfo {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

/// Reply sent by a node to a device discovery probe.
///
/// Field names match what the host-side discovery tool prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAnnouncement {
    pub hostname: String,
    pub ip: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Unsolicited broadcast a node sends to the discovery port once it has an
/// address, so listening tools learn about it without probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupAnnouncement {
    pub announce: String,
    pub hostname: String,
    pub ip: String,
    #[serde(rename = "type")]
    pub device_type: String,
}
