//! Socket primitive layer.
//!
//! [`SocketDriver`] is the seam between wizlink services and whatever
//! socket engine sits underneath: the W5500's hardware sockets on target,
//! [`UdpDriver`] on a host, or the `mock` driver (feature `mock`) in tests.
//! The layer has no logic of its own beyond mapping engine failures into
//! [`SocketError`].

pub mod driver;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod udp;

pub use driver::{SocketDriver, SocketKind, SocketStatus};
pub use error::SocketError;
pub use udp::UdpDriver;
pub use wizlink_protocol::SocketId;
