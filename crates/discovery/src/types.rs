use std::time::Duration;

use wizlink_protocol::SocketId;
use wizlink_protocol::constants::{
    DEVICE_DISCOVERY_PORT, DEVICE_DISCOVERY_PROBE, DEVICE_DISCOVERY_SOCKET, DEVICE_HOSTNAME,
    DEVICE_TYPE, FIRMWARE_VERSION, SOCKET_POLL_INTERVAL, UROS_AGENT_PORT, UROS_DISCOVERY_MAX_SENDS,
    UROS_DISCOVERY_PORT, UROS_DISCOVERY_REQUEST, UROS_DISCOVERY_RESEND_INTERVAL,
    UROS_DISCOVERY_SIGNATURE, UROS_DISCOVERY_TIMEOUT, UROS_LOCAL_PORT, UROS_SOCKET,
};

use crate::DiscoveryError;

/// Parameters for a broadcast agent search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Socket borrowed for the duration of the search.
    pub socket: SocketId,
    pub local_port: u16,
    /// Port the broadcast request is sent to.
    pub discovery_port: u16,
    pub request: Vec<u8>,
    /// Prefix a reply must start with to count as an agent.
    pub signature: Vec<u8>,
    pub timeout: Duration,
    /// The n-th resend goes out once `n * resend_interval` has elapsed.
    pub resend_interval: Duration,
    /// Total requests sent, including the first.
    pub max_sends: u32,
    pub poll_interval: Duration,
    /// Data port recorded for a discovered agent.
    pub agent_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            socket: UROS_SOCKET,
            local_port: UROS_LOCAL_PORT,
            discovery_port: UROS_DISCOVERY_PORT,
            request: UROS_DISCOVERY_REQUEST.to_vec(),
            signature: UROS_DISCOVERY_SIGNATURE.to_vec(),
            timeout: UROS_DISCOVERY_TIMEOUT,
            resend_interval: UROS_DISCOVERY_RESEND_INTERVAL,
            max_sends: UROS_DISCOVERY_MAX_SENDS,
            poll_interval: SOCKET_POLL_INTERVAL,
            agent_port: UROS_AGENT_PORT,
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.signature.is_empty() {
            return Err(DiscoveryError::Config("agent signature must not be empty".into()));
        }
        if self.max_sends == 0 {
            return Err(DiscoveryError::Config("max_sends must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(DiscoveryError::Config("poll interval must be non-zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(DiscoveryError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Identity and socket settings for the device discovery responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    pub socket: SocketId,
    pub port: u16,
    pub probe: Vec<u8>,
    pub hostname: String,
    pub device_type: String,
    pub version: String,
    pub poll_interval: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            socket: DEVICE_DISCOVERY_SOCKET,
            port: DEVICE_DISCOVERY_PORT,
            probe: DEVICE_DISCOVERY_PROBE.to_vec(),
            hostname: DEVICE_HOSTNAME.into(),
            device_type: DEVICE_TYPE.into(),
            version: FIRMWARE_VERSION.into(),
            poll_interval: SOCKET_POLL_INTERVAL,
        }
    }
}
