//! Shared constants and wire types for wizlink services.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{ErrorCode, UnknownErrorCode};
pub use types::{AgentInfo, DeviceAnnouncement, SocketId, StartupAnnouncement};
