use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::PeerIdentity;
use crate::message::{PeerMetadata, SyncMessage};

/// Transport-assigned handle of one channel between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Another endpoint holds the identity. Selects the client role.
    #[error("identity {0} is already registered")]
    AlreadyTaken(PeerIdentity),
    #[error("peer {0} is unreachable")]
    Unreachable(PeerIdentity),
    #[error("{0} is not open")]
    NotOpen(ConnectionId),
    #[error("endpoint has been destroyed")]
    Destroyed,
    #[error("transport failure: {0}")]
    Backend(String),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
}

/// Something that happened on an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A remote endpoint completed a handshake with us.
    Incoming {
        connection: ConnectionId,
        metadata: PeerMetadata,
    },
    Message {
        connection: ConnectionId,
        message: SyncMessage,
    },
    Closed {
        connection: ConnectionId,
    },
    /// A frame arrived that does not decode as a known message.
    Malformed {
        connection: ConnectionId,
        reason: String,
    },
    /// The channel itself failed.
    Error {
        connection: ConnectionId,
        reason: String,
    },
}

/// Peer-to-peer transport with unique identity registration.
///
/// `register` must be atomic across all devices: at most one endpoint holds
/// a given identity at any time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransportError::AlreadyTaken` if the identity is held by
    /// another endpoint, or another error if registration is impossible.
    async fn register(&self, identity: PeerIdentity) -> Result<Box<dyn Endpoint>, TransportError>;
}

/// A registered endpoint and the connections it owns.
#[async_trait]
pub trait Endpoint: Send {
    fn identity(&self) -> &PeerIdentity;

    /// Open a connection to `target`. Resolves once the channel is open.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Unreachable` if nothing is registered under
    /// `target`.
    async fn connect(
        &mut self,
        target: &PeerIdentity,
        metadata: PeerMetadata,
    ) -> Result<ConnectionId, TransportError>;

    /// Queue `message` on `connection`. Order per connection is preserved.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotOpen` if the channel is gone.
    fn send(&self, connection: ConnectionId, message: &SyncMessage) -> Result<(), TransportError>;

    /// Close `connection`. Both sides observe `TransportEvent::Closed`.
    fn close(&self, connection: ConnectionId);

    /// Next event, or `None` once the endpoint is destroyed.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Release the identity and close every connection of this endpoint.
    fn destroy(&mut self);
}
