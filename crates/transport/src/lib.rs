//! Connection-health manager for the micro-ROS agent link.
//!
//! Discovers the agent, keeps one socket open towards it, reconnects with
//! exponential backoff and supervises the link with a periodic heartbeat.

pub mod custom;
pub mod error;
mod heartbeat;
pub mod manager;
mod reconnection;
pub mod types;

pub use custom::CustomTransport;
pub use error::TransportError;
pub use heartbeat::heartbeat_pump;
pub use manager::Transport;
pub use types::{
    ConnectionState, ConnectionStats, ReconnectConfig, TransportConfig, TransportEvent,
    TransportMode,
};
