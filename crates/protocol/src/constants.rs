//! Compile-time defaults shared by every wizlink service.
//!
//! Socket assignment on the W5500 (eight hardware sockets):
//!
//! | Socket | Service                  |
//! |--------|--------------------------|
//! | 0      | DHCP client              |
//! | 1      | ICMP echo                |
//! | 2      | reserved                 |
//! | 3      | TFTP client              |
//! | 4      | micro-ROS transport      |
//! | 5      | HTTP configuration       |
//! | 6      | device discovery         |
//! | 7      | OTA update               |

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::types::SocketId;

// ---------------------------------------------------------------------------
// Socket assignment
// ---------------------------------------------------------------------------

pub const DHCP_SOCKET: SocketId = SocketId(0);
pub const ICMP_SOCKET: SocketId = SocketId(1);
pub const TFTP_SOCKET: SocketId = SocketId(3);
pub const UROS_SOCKET: SocketId = SocketId(4);
pub const HTTP_SOCKET: SocketId = SocketId(5);
pub const DEVICE_DISCOVERY_SOCKET: SocketId = SocketId(6);
pub const OTA_SOCKET: SocketId = SocketId(7);

/// Number of hardware sockets on the controller.
pub const MAX_SOCKETS: u8 = 8;

// ---------------------------------------------------------------------------
// micro-ROS transport
// ---------------------------------------------------------------------------

/// Local port the transport socket binds to.
pub const UROS_LOCAL_PORT: u16 = 8888;

/// Agent data port.
pub const UROS_AGENT_PORT: u16 = 8888;

/// Largest datagram exchanged with the agent.
pub const UROS_MAX_PACKET_SIZE: usize = 1024;

/// Agent used when none is configured and discovery finds nothing.
pub const DEFAULT_AGENT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);

/// Maximum connect attempts inside a single reconnect.
pub const UROS_MAX_RETRY: u32 = 10;

/// Backoff before the second connect attempt.
pub const UROS_INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Backoff ceiling.
pub const UROS_MAX_RETRY_DELAY: Duration = Duration::from_millis(5000);

/// Backoff multiplier.
pub const UROS_RETRY_FACTOR: u32 = 2;

/// Minimum spacing between heartbeat checks.
pub const UROS_HEARTBEAT_PERIOD: Duration = Duration::from_millis(5000);

/// A connection idle for this many heartbeat periods gets a liveness probe.
pub const UROS_IDLE_HEARTBEATS: u32 = 3;

// ---------------------------------------------------------------------------
// Agent discovery
// ---------------------------------------------------------------------------

/// Port the agent listens on for discovery broadcasts.
pub const UROS_DISCOVERY_PORT: u16 = 8888;

/// Payload broadcast to locate an agent.
pub const UROS_DISCOVERY_REQUEST: &[u8] = b"discover-micro-ros";

/// Prefix an agent reply must start with.
pub const UROS_DISCOVERY_SIGNATURE: &[u8] = b"uros-agent";

/// Total window for one discovery run.
pub const UROS_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Offset between successive discovery broadcasts.
pub const UROS_DISCOVERY_RESEND_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on broadcasts per discovery run.
pub const UROS_DISCOVERY_MAX_SENDS: u32 = 5;

/// Wait between non-blocking receive checks.
pub const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Device discovery (host tools locating this node)
// ---------------------------------------------------------------------------

pub const DEVICE_DISCOVERY_PORT: u16 = 5678;
pub const DEVICE_DISCOVERY_PROBE: &[u8] = b"DISCOVER_STM32";
/// `announce` value of the broadcast sent when the responder comes up.
pub const DEVICE_ANNOUNCE_KIND: &str = "stm32_device";
pub const DEVICE_HOSTNAME: &str = "uros_w5500";
pub const DEVICE_TYPE: &str = "uros_edge";
pub const FIRMWARE_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// ICMP
// ---------------------------------------------------------------------------

pub const PING_TIMEOUT: Duration = Duration::from_millis(5000);
pub const PING_BUFFER_SIZE: usize = 64;
pub const PING_PAYLOAD_LEN: usize = 32;
/// Echo identifier stamped on every outgoing request.
pub const PING_IDENTIFIER: u16 = 0x1234;

// ---------------------------------------------------------------------------
// DHCP
// ---------------------------------------------------------------------------

pub const DHCP_RETRY: u32 = 5;
pub const DHCP_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DHCP_TICK_INTERVAL: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// Static network configuration
// ---------------------------------------------------------------------------

/// WIZnet OUI with a board-local suffix.
pub const DEFAULT_MAC: [u8; 6] = [0x00, 0x08, 0xDC, 0x01, 0x02, 0x03];
pub const STATIC_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 200);
pub const STATIC_SUBNET: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const STATIC_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const STATIC_DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
pub const USE_DHCP: bool = true;
