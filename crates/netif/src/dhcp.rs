//! DHCP lease tracking.
//!
//! The DHCP exchange itself lives in a [`LeaseSource`]. [`DhcpMonitor`]
//! polls it, keeps the current lease and turns engine states into
//! [`IpEvent`]s for the rest of the node.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use wizlink_protocol::constants::DHCP_RETRY;

use crate::config::NetworkConfig;

/// Addressing handed out by a DHCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub lease_time: Option<Duration>,
}

/// What one run of the DHCP engine reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStatus {
    /// Exchange in progress.
    Running,
    /// First lease obtained.
    Assigned(Lease),
    /// Renewal produced a different lease.
    Changed(Lease),
    /// Current lease still valid.
    Leased,
    Conflict,
    Failed,
    Stopped,
}

/// A DHCP engine.
pub trait LeaseSource: Send {
    /// Advances the engine and reports its state.
    fn run(&mut self) -> LeaseStatus;

    /// One-second housekeeping tick.
    fn tick(&mut self) {}

    /// Called once the monitor has given up on the engine.
    fn stop(&mut self) {}
}

/// Addressing state as seen by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpStatus {
    #[default]
    Unassigned,
    Processing,
    Assigned,
    Changed,
    Conflict,
    Failed,
    Stopped,
}

impl fmt::Display for IpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpStatus::Unassigned => "unassigned",
            IpStatus::Processing => "processing",
            IpStatus::Assigned => "assigned",
            IpStatus::Changed => "changed",
            IpStatus::Conflict => "conflict",
            IpStatus::Failed => "failed",
            IpStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Addressing transitions other services react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpEvent {
    Assigned(Lease),
    Changed(Lease),
    Conflict,
    Failed,
}

pub struct DhcpMonitor<S> {
    source: S,
    config: NetworkConfig,
    lease: Option<Lease>,
    status: IpStatus,
    failures: u32,
    max_retries: u32,
}

impl<S: LeaseSource> DhcpMonitor<S> {
    /// With DHCP disabled in `config` the monitor reports the static
    /// address as assigned and never calls the source.
    pub fn new(source: S, config: NetworkConfig) -> Self {
        let status = if config.use_dhcp {
            IpStatus::Unassigned
        } else {
            IpStatus::Assigned
        };
        Self {
            source,
            config,
            lease: None,
            status,
            failures: 0,
            max_retries: DHCP_RETRY,
        }
    }

    /// Consecutive failures tolerated before the engine is stopped.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Runs the engine once.
    pub fn poll(&mut self) -> Option<IpEvent> {
        if !self.config.use_dhcp || self.status == IpStatus::Stopped {
            return None;
        }

        match self.source.run() {
            LeaseStatus::Assigned(lease) => {
                info!(ip = %lease.ip, gateway = %lease.gateway, "DHCP lease assigned");
                self.accept(lease, IpStatus::Assigned);
                Some(IpEvent::Assigned(lease))
            }
            LeaseStatus::Changed(lease) => {
                info!(ip = %lease.ip, "DHCP lease changed");
                self.accept(lease, IpStatus::Changed);
                Some(IpEvent::Changed(lease))
            }
            LeaseStatus::Leased => {
                self.status = IpStatus::Assigned;
                None
            }
            LeaseStatus::Running => {
                self.status = IpStatus::Processing;
                None
            }
            LeaseStatus::Conflict => {
                warn!("DHCP address conflict");
                self.lease = None;
                self.status = IpStatus::Conflict;
                Some(IpEvent::Conflict)
            }
            LeaseStatus::Failed => {
                self.lease = None;
                self.failures += 1;
                if self.failures > self.max_retries {
                    warn!(failures = self.failures, "DHCP gave up, keeping static address");
                    self.source.stop();
                    self.status = IpStatus::Stopped;
                } else {
                    warn!(failures = self.failures, "DHCP failed");
                    self.status = IpStatus::Failed;
                }
                Some(IpEvent::Failed)
            }
            LeaseStatus::Stopped => {
                debug!("DHCP engine stopped");
                self.status = IpStatus::Stopped;
                None
            }
        }
    }

    /// Forwards the one-second tick while DHCP is active.
    pub fn tick(&mut self) {
        if self.config.use_dhcp && self.status != IpStatus::Stopped {
            self.source.tick();
        }
    }

    fn accept(&mut self, lease: Lease, status: IpStatus) {
        self.lease = Some(lease);
        self.status = status;
        self.failures = 0;
    }

    pub fn status(&self) -> IpStatus {
        self.status
    }

    pub fn is_assigned(&self) -> bool {
        !self.config.use_dhcp || self.lease.is_some()
    }

    pub fn lease(&self) -> Option<Lease> {
        self.lease
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.lease.map_or(self.config.ip, |l| l.ip)
    }

    pub fn subnet(&self) -> Ipv4Addr {
        self.lease.map_or(self.config.subnet, |l| l.subnet)
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.lease.map_or(self.config.gateway, |l| l.gateway)
    }

    pub fn dns(&self) -> Ipv4Addr {
        self.lease.map_or(self.config.dns, |l| l.dns)
    }
}

/// Lease source backed by the host's own interface addressing.
///
/// The host's DHCP client does the actual exchange; this reports its
/// result. Gateway and DNS are not visible through the interface list and
/// come from the static configuration.
pub struct HostLease {
    interface: Option<String>,
    gateway: Ipv4Addr,
    dns: Ipv4Addr,
    current: Option<Lease>,
}

struct HostAddr {
    name: String,
    ip: Ipv4Addr,
    netmask: Ipv4Addr,
}

impl HostLease {
    /// Watches `interface`, or the first usable IPv4 interface when `None`.
    pub fn new(interface: Option<String>, config: &NetworkConfig) -> Self {
        Self {
            interface,
            gateway: config.gateway,
            dns: config.dns,
            current: None,
        }
    }

    fn observe(&mut self, addrs: Vec<HostAddr>) -> LeaseStatus {
        let found = addrs
            .into_iter()
            .find(|a| self.interface.as_deref().is_none_or(|name| a.name == name))
            .map(|a| Lease {
                ip: a.ip,
                subnet: a.netmask,
                gateway: self.gateway,
                dns: self.dns,
                lease_time: None,
            });

        match (found, self.current) {
            (None, None) => LeaseStatus::Running,
            (None, Some(_)) => {
                self.current = None;
                LeaseStatus::Failed
            }
            (Some(lease), None) => {
                self.current = Some(lease);
                LeaseStatus::Assigned(lease)
            }
            (Some(lease), Some(old)) if lease != old => {
                self.current = Some(lease);
                LeaseStatus::Changed(lease)
            }
            (Some(_), Some(_)) => LeaseStatus::Leased,
        }
    }
}

impl LeaseSource for HostLease {
    fn run(&mut self) -> LeaseStatus {
        self.observe(host_addrs())
    }
}

fn host_addrs() -> Vec<HostAddr> {
    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return Vec::new();
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) if !v4.ip.is_loopback() && !v4.ip.is_link_local() => {
                Some(HostAddr {
                    name: iface.name,
                    ip: v4.ip,
                    netmask: v4.netmask,
                })
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Default)]
    struct Scripted {
        script: VecDeque<LeaseStatus>,
        runs: u32,
        ticks: u32,
        stopped: bool,
    }

    impl Scripted {
        fn new(script: impl IntoIterator<Item = LeaseStatus>) -> Self {
            Self {
                script: script.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl LeaseSource for Scripted {
        fn run(&mut self) -> LeaseStatus {
            self.runs += 1;
            self.script.pop_front().unwrap_or(LeaseStatus::Leased)
        }

        fn tick(&mut self) {
            self.ticks += 1;
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    fn lease(last: u8) -> Lease {
        Lease {
            ip: Ipv4Addr::new(10, 0, 0, last),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            dns: Ipv4Addr::new(10, 0, 0, 1),
            lease_time: Some(Duration::from_secs(3600)),
        }
    }

    #[test]
    fn static_config_is_always_assigned() {
        let config = NetworkConfig {
            use_dhcp: false,
            ..NetworkConfig::default()
        };
        let mut monitor = DhcpMonitor::new(Scripted::new([LeaseStatus::Failed]), config.clone());

        assert_eq!(monitor.poll(), None);
        monitor.tick();
        assert_eq!(monitor.status(), IpStatus::Assigned);
        assert!(monitor.is_assigned());
        assert_eq!(monitor.ip(), config.ip);
        assert_eq!(monitor.source().runs, 0);
        assert_eq!(monitor.source().ticks, 0);
    }

    #[test]
    fn lease_lifecycle_events() {
        let mut monitor = DhcpMonitor::new(
            Scripted::new([
                LeaseStatus::Running,
                LeaseStatus::Assigned(lease(20)),
                LeaseStatus::Leased,
                LeaseStatus::Changed(lease(21)),
            ]),
            NetworkConfig::default(),
        );

        assert_eq!(monitor.poll(), None);
        assert_eq!(monitor.status(), IpStatus::Processing);
        assert!(!monitor.is_assigned());

        assert_eq!(monitor.poll(), Some(IpEvent::Assigned(lease(20))));
        assert_eq!(monitor.ip(), Ipv4Addr::new(10, 0, 0, 20));

        assert_eq!(monitor.poll(), None);
        assert_eq!(monitor.status(), IpStatus::Assigned);

        assert_eq!(monitor.poll(), Some(IpEvent::Changed(lease(21))));
        assert_eq!(monitor.status(), IpStatus::Changed);
        assert_eq!(monitor.lease(), Some(lease(21)));
    }

    #[test]
    fn accessors_fall_back_to_static_config() {
        let config = NetworkConfig::default();
        let mut monitor = DhcpMonitor::new(
            Scripted::new([LeaseStatus::Assigned(lease(9)), LeaseStatus::Conflict]),
            config.clone(),
        );

        assert_eq!(monitor.gateway(), config.gateway);
        monitor.poll();
        assert_eq!(monitor.gateway(), Ipv4Addr::new(10, 0, 0, 1));

        assert_eq!(monitor.poll(), Some(IpEvent::Conflict));
        assert!(!monitor.is_assigned());
        assert_eq!(monitor.ip(), config.ip);
        assert_eq!(monitor.subnet(), config.subnet);
        assert_eq!(monitor.dns(), config.dns);
    }

    #[test]
    fn gives_up_after_repeated_failures() {
        let mut monitor = DhcpMonitor::new(
            Scripted::new(std::iter::repeat_n(LeaseStatus::Failed, 10)),
            NetworkConfig::default(),
        )
        .with_max_retries(2);

        for _ in 0..2 {
            assert_eq!(monitor.poll(), Some(IpEvent::Failed));
            assert_eq!(monitor.status(), IpStatus::Failed);
        }
        assert_eq!(monitor.poll(), Some(IpEvent::Failed));
        assert_eq!(monitor.status(), IpStatus::Stopped);
        assert!(monitor.source().stopped);

        assert_eq!(monitor.poll(), None);
        monitor.tick();
        assert_eq!(monitor.source().runs, 3);
        assert_eq!(monitor.source().ticks, 0);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut script = vec![LeaseStatus::Failed, LeaseStatus::Failed];
        script.push(LeaseStatus::Assigned(lease(5)));
        script.extend([LeaseStatus::Failed, LeaseStatus::Failed]);
        let mut monitor =
            DhcpMonitor::new(Scripted::new(script), NetworkConfig::default()).with_max_retries(2);

        for _ in 0..5 {
            monitor.poll();
        }
        assert_eq!(monitor.status(), IpStatus::Failed);
        assert!(!monitor.source().stopped);
    }

    #[test]
    fn tick_reaches_active_source() {
        let mut monitor = DhcpMonitor::new(Scripted::default(), NetworkConfig::default());
        monitor.tick();
        monitor.tick();
        assert_eq!(monitor.source().ticks, 2);
    }

    fn host(name: &str, ip: [u8; 4]) -> HostAddr {
        HostAddr {
            name: name.to_string(),
            ip: Ipv4Addr::from(ip),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
        }
    }

    #[test]
    fn host_lease_tracks_interface_address() {
        let mut source = HostLease::new(Some("eth0".into()), &NetworkConfig::default());

        assert_eq!(source.observe(vec![host("wlan0", [10, 1, 1, 2])]), LeaseStatus::Running);

        let LeaseStatus::Assigned(first) = source.observe(vec![
            host("wlan0", [10, 1, 1, 2]),
            host("eth0", [192, 168, 1, 42]),
        ]) else {
            panic!("expected a new lease");
        };
        assert_eq!(first.ip, Ipv4Addr::new(192, 168, 1, 42));
        assert_eq!(first.gateway, Ipv4Addr::new(192, 168, 1, 1));

        assert_eq!(
            source.observe(vec![host("eth0", [192, 168, 1, 42])]),
            LeaseStatus::Leased
        );
        assert!(matches!(
            source.observe(vec![host("eth0", [192, 168, 1, 43])]),
            LeaseStatus::Changed(l) if l.ip == Ipv4Addr::new(192, 168, 1, 43)
        ));
        assert_eq!(source.observe(Vec::new()), LeaseStatus::Failed);
        assert_eq!(source.observe(Vec::new()), LeaseStatus::Running);
    }

    #[test]
    fn host_lease_without_name_takes_first() {
        let mut source = HostLease::new(None, &NetworkConfig::default());
        assert!(matches!(
            source.observe(vec![host("a", [10, 0, 0, 2]), host("b", [10, 0, 1, 2])]),
            LeaseStatus::Assigned(l) if l.ip == Ipv4Addr::new(10, 0, 0, 2)
        ));
    }
}
