//! Live progress synchronization between devices of the same user.
//!
//! One device holds the deterministic identity derived from the quiz and
//! user and acts as host; every other device connects to it as a client.
//! The host relays updates between clients and hands its role over when
//! it disappears.

#![forbid(unsafe_code)]

pub mod identity;
pub mod loopback;
pub mod message;
pub mod protocol;
pub mod session;
pub mod transport;

pub use identity::{PeerIdentity, host_identity};
pub use loopback::LoopbackNetwork;
pub use message::{DeviceClass, InitialSync, PeerMetadata, QuestionUpdate, SyncMessage};
pub use protocol::{ConnectionState, Delivery, PeerConnection, Role, SyncSnapshot};
pub use session::{HeartbeatConfig, PeerEvent, PeerSession, PeerSummary};
pub use transport::{ConnectionId, Endpoint, Transport, TransportError, TransportEvent};
