//! Node configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/wizlink/node.toml`
//! - Windows: `%APPDATA%/wizlink/node.toml`
//!
//! Durations are written in milliseconds.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wizlink_discovery::{DiscoveryConfig, ResponderConfig, get_hostname};
use wizlink_netif::NetworkConfig;
use wizlink_protocol::AgentInfo;
use wizlink_protocol::constants::{
    DEFAULT_AGENT_IP, DEVICE_DISCOVERY_PORT, DEVICE_TYPE, FIRMWARE_VERSION, UROS_AGENT_PORT,
    UROS_DISCOVERY_MAX_SENDS, UROS_DISCOVERY_PORT, UROS_DISCOVERY_RESEND_INTERVAL,
    UROS_DISCOVERY_TIMEOUT, UROS_HEARTBEAT_PERIOD, UROS_IDLE_HEARTBEATS,
    UROS_INITIAL_RETRY_DELAY, UROS_LOCAL_PORT, UROS_MAX_RETRY, UROS_MAX_RETRY_DELAY,
    UROS_RETRY_FACTOR,
};
use wizlink_transport::{ReconnectConfig, TransportConfig, TransportMode};

/// Node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub discovery: DiscoverySection,
}

/// How the node presents itself to discovery tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Announced host name (system host name by default).
    pub hostname: String,
    pub device_type: String,
    /// Interface whose address is tracked; first usable one when unset.
    pub interface: Option<String>,
    /// Answer ICMP echo requests when the socket layer supports it.
    pub ping_responder: bool,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            hostname: get_hostname(),
            device_type: DEVICE_TYPE.into(),
            interface: None,
            ping_responder: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Fixed agent address. Empty means discover it.
    pub agent: Option<String>,
    pub agent_port: u16,
    pub local_port: u16,
    pub mode: TransportMode,
    pub fallback_agent: Ipv4Addr,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: u32,
    pub heartbeat_ms: u64,
    pub idle_heartbeats: u32,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            agent: None,
            agent_port: UROS_AGENT_PORT,
            local_port: UROS_LOCAL_PORT,
            mode: TransportMode::Udp,
            fallback_agent: DEFAULT_AGENT_IP,
            max_attempts: UROS_MAX_RETRY,
            initial_delay_ms: millis(UROS_INITIAL_RETRY_DELAY),
            max_delay_ms: millis(UROS_MAX_RETRY_DELAY),
            factor: UROS_RETRY_FACTOR,
            heartbeat_ms: millis(UROS_HEARTBEAT_PERIOD),
            idle_heartbeats: UROS_IDLE_HEARTBEATS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Port the agent listens on for discovery broadcasts.
    pub agent_port: u16,
    pub timeout_ms: u64,
    pub resend_ms: u64,
    pub max_sends: u32,
    /// Port the device responder listens on for tool probes.
    pub responder_port: u16,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            agent_port: UROS_DISCOVERY_PORT,
            timeout_ms: millis(UROS_DISCOVERY_TIMEOUT),
            resend_ms: millis(UROS_DISCOVERY_RESEND_INTERVAL),
            max_sends: UROS_DISCOVERY_MAX_SENDS,
            responder_port: DEVICE_DISCOVERY_PORT,
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// Upper bound for every `*_ms` setting (one day).
const MAX_DURATION_MS: u64 = 86_400_000;

fn check_millis(name: &str, value: u64) -> anyhow::Result<()> {
    anyhow::ensure!(
        (1..=MAX_DURATION_MS).contains(&value),
        "{name} must be between 1 and {MAX_DURATION_MS} ms, got {value}"
    );
    Ok(())
}

impl TransportSection {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_millis("transport.heartbeat_ms", self.heartbeat_ms)?;
        check_millis("transport.initial_delay_ms", self.initial_delay_ms)?;
        check_millis("transport.max_delay_ms", self.max_delay_ms)?;
        anyhow::ensure!(
            self.initial_delay_ms <= self.max_delay_ms,
            "transport.initial_delay_ms exceeds transport.max_delay_ms"
        );
        anyhow::ensure!(self.factor >= 1, "transport.factor must be at least 1");
        anyhow::ensure!(
            self.idle_heartbeats >= 1,
            "transport.idle_heartbeats must be at least 1"
        );
        Ok(())
    }
}

impl DiscoverySection {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_millis("discovery.timeout_ms", self.timeout_ms)?;
        check_millis("discovery.resend_ms", self.resend_ms)?;
        anyhow::ensure!(self.max_sends >= 1, "discovery.max_sends must be at least 1");
        Ok(())
    }
}

impl NodeConfig {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            let config = NodeConfig::default();
            config.save_to(path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the services cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.network.validate()?;
        self.transport.validate()?;
        self.discovery.validate()?;
        self.transport_config().discovery.validate()?;
        Ok(())
    }

    /// Writes the configuration to `path`, readable by the owner only.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let t = &self.transport;
        let d = &self.discovery;
        TransportConfig {
            local_port: t.local_port,
            mode: t.mode,
            reconnect: ReconnectConfig {
                max_attempts: t.max_attempts,
                initial_delay: Duration::from_millis(t.initial_delay_ms),
                max_delay: Duration::from_millis(t.max_delay_ms),
                factor: t.factor,
            },
            heartbeat_interval: Duration::from_millis(t.heartbeat_ms),
            idle_heartbeats: t.idle_heartbeats,
            discovery: DiscoveryConfig {
                local_port: t.local_port,
                discovery_port: d.agent_port,
                timeout: Duration::from_millis(d.timeout_ms),
                resend_interval: Duration::from_millis(d.resend_ms),
                max_sends: d.max_sends,
                agent_port: t.agent_port,
                ..DiscoveryConfig::default()
            },
            fallback_agent: AgentInfo::new(t.fallback_agent, t.agent_port),
            ..TransportConfig::default()
        }
    }

    pub fn responder_config(&self) -> ResponderConfig {
        ResponderConfig {
            port: self.discovery.responder_port,
            hostname: self.device.hostname.clone(),
            device_type: self.device.device_type.clone(),
            version: FIRMWARE_VERSION.into(),
            ..ResponderConfig::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("wizlink").join("node.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("wizlink")
            .join("node.toml"))
    }
}
