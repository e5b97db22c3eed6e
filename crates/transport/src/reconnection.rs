//! Reconnection with exponential backoff.

use tracing::{debug, info, warn};

use wizlink_protocol::AgentInfo;
use wizlink_socket::SocketDriver;

use crate::error::TransportError;
use crate::manager::Transport;
use crate::types::TransportEvent;

impl<D: SocketDriver> Transport<D> {
    /// Re-establishes the link to `agent`.
    ///
    /// An unset agent is discovered first, falling back to the configured
    /// default agent when nobody answers. Then up to `max_attempts` connects
    /// are made with a growing pause between failures; neither lock is held
    /// during a pause.
    pub async fn reconnect(&self, agent: &mut AgentInfo) -> Result<(), TransportError> {
        if agent.is_unset() {
            if let Err(e) = self.discover(agent).await {
                *agent = self.inner.config.fallback_agent;
                info!(%agent, "discovery failed ({e}), using default agent");
            }
        } else {
            self.close().await;
        }

        let reconnect = &self.inner.config.reconnect;
        for attempt in 1..=reconnect.max_attempts {
            self.shared().stats.reconnect_attempts += 1;
            debug!(%agent, attempt, "reconnect attempt");

            match self.connect(agent).await {
                Ok(()) => {
                    self.shared().stats.successful_reconnects += 1;
                    self.emit(TransportEvent::Reconnected {
                        agent: *agent,
                        attempts: attempt,
                    });
                    info!(%agent, attempt, "reconnected");
                    return Ok(());
                }
                Err(e) if attempt < reconnect.max_attempts => {
                    let delay = reconnect.delay_for_attempt(attempt);
                    warn!(
                        %agent,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    self.emit(TransportEvent::Reconnecting {
                        attempt,
                        next_retry: delay,
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(%agent, attempt, error = %e, "final reconnect attempt failed");
                }
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts: reconnect.max_attempts,
        })
    }
}
