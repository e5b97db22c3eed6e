//! Link supervision: periodic health checks and the pump that drives them.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wizlink_protocol::AgentInfo;
use wizlink_socket::SocketDriver;

use crate::manager::Transport;
use crate::types::ConnectionState;

impl<D: SocketDriver> Transport<D> {
    /// Checks link health and reconnects when it is gone.
    ///
    /// Calls closer together than `heartbeat_interval` do no socket work and
    /// report the cached state. Otherwise a missing socket triggers a
    /// reconnect, and a socket silent for longer than the idle timeout gets
    /// a status check first.
    pub async fn heartbeat(&self, agent: &mut AgentInfo) -> bool {
        let config = &self.inner.config;
        let now = Instant::now();

        let (link, last_activity) = {
            let mut shared = self.shared();
            let due = shared
                .last_heartbeat
                .is_none_or(|last| now.duration_since(last) >= config.heartbeat_interval);
            if !due {
                return shared.stats.state == ConnectionState::Connected;
            }
            shared.last_heartbeat = Some(now);
            (shared.link, shared.stats.last_activity)
        };

        let Some(link) = link else {
            debug!("heartbeat: no socket, reconnecting");
            return self.reconnect(agent).await.is_ok();
        };

        let last_seen = last_activity.map_or(link.connected_at, |t| t.max(link.connected_at));
        let idle = now.duration_since(last_seen);
        if idle <= config.idle_timeout() {
            debug!(idle_ms = idle.as_millis() as u64, "heartbeat: link active");
            return true;
        }

        debug!(idle_ms = idle.as_millis() as u64, "heartbeat: link idle, checking socket");
        if self.status().await {
            return true;
        }

        warn!("heartbeat: socket check failed, reconnecting");
        self.reconnect(agent).await.is_ok()
    }
}

/// Runs [`Transport::heartbeat`] every `heartbeat_interval` until cancelled.
///
/// Returns the agent as last resolved so the caller can reuse it.
pub async fn heartbeat_pump<D: SocketDriver>(
    transport: Transport<D>,
    mut agent: AgentInfo,
    cancel: CancellationToken,
) -> AgentInfo {
    // `interval` rejects a zero period.
    let period = transport
        .config()
        .heartbeat_interval
        .max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if !transport.heartbeat(&mut agent).await {
                    warn!(%agent, state = %transport.state(), "agent link unhealthy");
                }
            }
        }
    }

    agent
}
