//! Network interface bring-up for the node.
//!
//! Covers what happens below the micro-ROS link: which address the
//! interface uses ([`NetworkConfig`], [`DhcpMonitor`]) and answering or
//! sending ICMP echoes ([`icmp::Pinger`]).

pub mod config;
pub mod dhcp;
pub mod icmp;

use std::net::Ipv4Addr;

pub use config::{MacAddr, NetworkConfig};
pub use dhcp::{DhcpMonitor, HostLease, IpEvent, IpStatus, Lease, LeaseSource, LeaseStatus};
pub use icmp::{IcmpError, PingStats, Pinger};

#[derive(Debug, thiserror::Error)]
pub enum NetifError {
    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("MAC address {0} is a multicast address")]
    MulticastMac(MacAddr),

    #[error("subnet mask {0} is not contiguous")]
    InvalidSubnet(Ipv4Addr),

    #[error("static addressing needs an IP address")]
    MissingAddress,
}
