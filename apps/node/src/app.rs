//! Application orchestrator: wires the node's services together.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use wizlink_discovery::Responder;
use wizlink_netif::{DhcpMonitor, HostLease, IpEvent, LeaseSource, Pinger};
use wizlink_protocol::constants::{DHCP_TICK_INTERVAL, ICMP_SOCKET};
use wizlink_socket::{SocketDriver, UdpDriver};
use wizlink_transport::{CustomTransport, Transport, TransportEvent, heartbeat_pump};

use crate::config::NodeConfig;

const STATS_INTERVAL: Duration = Duration::from_millis(1000);

/// Runs the node until shutdown is requested.
pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // -- micro-ROS transport --
    let transport = Transport::new(UdpDriver::new(), config.transport_config());
    let driver = transport.driver();
    let events = transport
        .take_events()
        .await
        .context("transport events already taken")?;

    // -- Addressing, device discovery, ICMP --
    let monitor = DhcpMonitor::new(
        HostLease::new(config.device.interface.clone(), &config.network),
        config.network.clone(),
    );
    let responder_config = config.responder_config();
    let poll = responder_config.poll_interval;
    let services = NetworkServices {
        monitor,
        responder: Responder::new(driver.clone(), responder_config),
        pinger: config
            .device
            .ping_responder
            .then(|| Pinger::new(driver.clone(), ICMP_SOCKET)),
    };
    let network = tokio::spawn(services.run(poll, cancel.clone()));

    // -- Agent link --
    let mut link = CustomTransport::new(transport.clone());
    match link.open(config.transport.agent.as_deref()).await {
        Ok(()) => tracing::info!(agent = %link.agent(), "agent link open"),
        Err(e) => tracing::warn!("agent link not up yet ({e}), heartbeat will retry"),
    }
    let heartbeat = tokio::spawn(heartbeat_pump(
        transport.clone(),
        link.agent(),
        cancel.clone(),
    ));

    // -- Statistics --
    let stats = tokio::spawn(log_stats(transport.clone(), events, cancel.clone()));

    tracing::info!("node ready");

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!("shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    // -- Graceful shutdown --
    tracing::info!("stopping services...");
    cancel.cancel();
    let agent = heartbeat.await?;
    network.await?;
    stats.await?;
    link.close().await;

    let final_stats = transport.stats();
    tracing::info!(
        %agent,
        bytes_sent = final_stats.bytes_sent,
        bytes_received = final_stats.bytes_received,
        reconnects = final_stats.successful_reconnects,
        "agent link closed"
    );
    Ok(())
}

/// Services that follow the interface address.
struct NetworkServices<D, S> {
    monitor: DhcpMonitor<S>,
    responder: Responder<D>,
    pinger: Option<Pinger<D>>,
}

impl<D: SocketDriver, S: LeaseSource> NetworkServices<D, S> {
    /// Ticks DHCP once a second and serves discovery probes and echo
    /// requests every `poll` until cancelled.
    async fn run(mut self, poll: Duration, cancel: CancellationToken) {
        if self.monitor.is_assigned() {
            self.restart_responder().await;
        }

        if let Some(mut pinger) = self.pinger.take() {
            match pinger.open().await {
                Ok(()) => self.pinger = Some(pinger),
                Err(e) => tracing::warn!("ICMP responder disabled: {e}"),
            }
        }

        let mut dhcp_tick = tokio::time::interval(DHCP_TICK_INTERVAL);
        dhcp_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut poll_tick = tokio::time::interval(poll);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = dhcp_tick.tick() => self.on_dhcp_tick().await,
                _ = poll_tick.tick() => self.serve().await,
            }
        }

        self.responder.stop().await;
        if let Some(pinger) = &mut self.pinger {
            pinger.close().await;
        }
    }

    async fn on_dhcp_tick(&mut self) {
        self.monitor.tick();
        match self.monitor.poll() {
            Some(IpEvent::Assigned(lease) | IpEvent::Changed(lease)) => {
                tracing::info!(ip = %lease.ip, "address up, restarting discovery responder");
                self.restart_responder().await;
            }
            Some(IpEvent::Conflict | IpEvent::Failed) => {
                tracing::warn!(
                    status = %self.monitor.status(),
                    fallback = %self.monitor.ip(),
                    "no DHCP lease"
                );
            }
            None => {}
        }
    }

    async fn restart_responder(&mut self) {
        let ip = self.monitor.ip();
        self.responder.set_subnet(self.monitor.subnet());
        if let Err(e) = self.responder.restart(Some(ip)).await {
            tracing::warn!(%ip, "discovery responder failed to start: {e}");
        }
    }

    async fn serve(&mut self) {
        if let Err(e) = self.responder.poll_once().await {
            tracing::warn!("discovery responder error: {e}");
        }
        if let Some(pinger) = &mut self.pinger
            && let Err(e) = pinger.respond_once().await
        {
            tracing::warn!("ICMP responder error: {e}");
        }
    }
}

/// Logs transport events as they happen and link statistics once a second.
async fn log_stats<D: SocketDriver>(
    transport: Transport<D>,
    mut events: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(event) = events.recv() => match event {
                TransportEvent::StateChanged(state) => {
                    tracing::info!(%state, "link state changed");
                }
                TransportEvent::Reconnecting { attempt, next_retry } => {
                    tracing::info!(
                        attempt,
                        next_retry_ms = next_retry.as_millis() as u64,
                        "reconnecting"
                    );
                }
                TransportEvent::AgentDiscovered(agent) => {
                    tracing::info!(%agent, "agent discovered");
                }
                TransportEvent::Reconnected { agent, attempts } => {
                    tracing::info!(%agent, attempts, "reconnected");
                }
            },
            _ = ticker.tick() => {
                let stats = transport.stats();
                tracing::debug!(
                    state = %stats.state,
                    last_error = %stats.last_error,
                    bytes_sent = stats.bytes_sent,
                    bytes_received = stats.bytes_received,
                    reconnect_attempts = stats.reconnect_attempts,
                    successful_reconnects = stats.successful_reconnects,
                    "link statistics"
                );
            }
        }
    }
}
