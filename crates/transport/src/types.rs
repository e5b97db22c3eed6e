//! Public types for the agent transport.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use wizlink_discovery::DiscoveryConfig;
use wizlink_protocol::constants::{
    UROS_HEARTBEAT_PERIOD, UROS_IDLE_HEARTBEATS, UROS_INITIAL_RETRY_DELAY, UROS_LOCAL_PORT,
    UROS_MAX_RETRY, UROS_MAX_RETRY_DELAY, UROS_RETRY_FACTOR, UROS_SOCKET,
};
use wizlink_protocol::{AgentInfo, ErrorCode, SocketId};

/// Link state of the agent connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last operation failed; the heartbeat will try to recover.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the link counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub last_error: ErrorCode,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Connect attempts made by reconnect, successful or not.
    pub reconnect_attempts: u32,
    pub successful_reconnects: u32,
    /// Time of the last send or receive that moved data.
    pub last_activity: Option<Instant>,
}

/// Socket mode used to reach the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Udp,
    Tcp,
}

/// Configuration for reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Connect attempts per reconnect call.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub factor: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: UROS_MAX_RETRY,
            initial_delay: UROS_INITIAL_RETRY_DELAY,
            max_delay: UROS_MAX_RETRY_DELAY,
            factor: UROS_RETRY_FACTOR,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the wait after a failed attempt (1-based):
    /// `initial_delay * factor^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        self.factor
            .max(1)
            .checked_pow(exp)
            .and_then(|mult| self.initial_delay.checked_mul(mult))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Everything the transport needs besides the socket driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub socket: SocketId,
    pub local_port: u16,
    pub mode: TransportMode,
    pub reconnect: ReconnectConfig,
    /// Minimum spacing between heartbeats that touch the socket.
    pub heartbeat_interval: Duration,
    /// Heartbeats of silence after which the socket status is checked.
    pub idle_heartbeats: u32,
    pub discovery: DiscoveryConfig,
    /// Agent used when discovery finds nothing.
    pub fallback_agent: AgentInfo,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket: UROS_SOCKET,
            local_port: UROS_LOCAL_PORT,
            mode: TransportMode::Udp,
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: UROS_HEARTBEAT_PERIOD,
            idle_heartbeats: UROS_IDLE_HEARTBEATS,
            discovery: DiscoveryConfig::default(),
            fallback_agent: AgentInfo::fallback(),
        }
    }
}

impl TransportConfig {
    /// Silence after which the heartbeat checks the socket.
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.idle_heartbeats)
    }
}

/// Events emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    StateChanged(ConnectionState),
    /// A connect attempt failed; the next one follows after `next_retry`.
    Reconnecting { attempt: u32, next_retry: Duration },
    AgentDiscovered(AgentInfo),
    Reconnected { agent: AgentInfo, attempts: u32 },
}
