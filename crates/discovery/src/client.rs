use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace};

use wizlink_protocol::AgentInfo;
use wizlink_socket::{SocketDriver, SocketKind};

use crate::DiscoveryError;
use crate::types::DiscoveryConfig;

/// Broadcasts a discovery request and returns the first agent that answers
/// with the configured signature.
///
/// Opens a UDP socket on `config.socket` for the duration of the search and
/// closes it on every exit path once it was opened. The driver lock is held
/// only around socket calls, never across the poll wait.
pub async fn discover_agent<D: SocketDriver>(
    driver: &Mutex<D>,
    config: &DiscoveryConfig,
) -> Result<AgentInfo, DiscoveryError> {
    config.validate()?;

    driver
        .lock()
        .await
        .open(config.socket, SocketKind::Udp, config.local_port)
        .await
        .map_err(DiscoveryError::Open)?;

    let result = search(driver, config).await;
    driver.lock().await.close(config.socket);

    match &result {
        Ok(agent) => info!(%agent, "agent discovered"),
        Err(e) => debug!("agent discovery failed: {e}"),
    }
    result
}

async fn search<D: SocketDriver>(
    driver: &Mutex<D>,
    config: &DiscoveryConfig,
) -> Result<AgentInfo, DiscoveryError> {
    let target = SocketAddrV4::new(Ipv4Addr::BROADCAST, config.discovery_port);
    let mut buf = [0u8; 128];
    let start = Instant::now();

    driver
        .lock()
        .await
        .send_to(config.socket, &config.request, target)
        .await?;
    let mut sends = 1u32;
    debug!(%target, "discovery request broadcast");

    while start.elapsed() < config.timeout {
        {
            let mut drv = driver.lock().await;

            let resend_due = config
                .resend_interval
                .checked_mul(sends)
                .is_some_and(|due| start.elapsed() > due);
            if sends < config.max_sends && resend_due {
                drv.send_to(config.socket, &config.request, target).await?;
                sends += 1;
                debug!(attempt = sends, "discovery request resent");
            }

            while let Some((n, from)) = drv
                .recv_from(config.socket, &mut buf)
                .map_err(DiscoveryError::Recv)?
            {
                if buf[..n].starts_with(&config.signature) {
                    return Ok(AgentInfo::new(*from.ip(), config.agent_port));
                }
                trace!(%from, bytes = n, "ignoring reply without agent signature");
            }
        }

        sleep(config.poll_interval).await;
    }

    Err(DiscoveryError::Timeout(config.timeout))
}
