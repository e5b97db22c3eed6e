//! Interface addressing: hardware address plus the static IPv4 setup used
//! when DHCP is off or has not produced a lease yet.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use wizlink_protocol::constants::{
    DEFAULT_MAC, STATIC_DNS, STATIC_GATEWAY, STATIC_IP, STATIC_SUBNET, USE_DHCP,
};

use crate::NetifError;

/// Ethernet hardware address, written as `AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Group bit of the first octet.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl Default for MacAddr {
    fn default() -> Self {
        Self(DEFAULT_MAC)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddr {
    type Err = NetifError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NetifError::InvalidMac(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Addressing for the node's single Ethernet interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub use_dhcp: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac: MacAddr::default(),
            ip: STATIC_IP,
            subnet: STATIC_SUBNET,
            gateway: STATIC_GATEWAY,
            dns: STATIC_DNS,
            use_dhcp: USE_DHCP,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), NetifError> {
        if self.mac.is_multicast() {
            return Err(NetifError::MulticastMac(self.mac));
        }
        if prefix_len(self.subnet).is_none() {
            return Err(NetifError::InvalidSubnet(self.subnet));
        }
        if !self.use_dhcp && self.ip.is_unspecified() {
            return Err(NetifError::MissingAddress);
        }
        Ok(())
    }

    /// CIDR prefix of the static subnet mask.
    pub fn prefix_len(&self) -> Option<u8> {
        prefix_len(self.subnet)
    }
}

/// Prefix length of a contiguous mask, `None` for masks with holes.
pub fn prefix_len(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    (bits.checked_shl(ones).unwrap_or(0) == 0).then_some(ones as u8)
}
