//! In-process transport.
//!
//! A shared hub plays the signaling server: it enforces unique identities
//! and carries JSON frames between endpoints over unbounded channels, so
//! several devices can run inside one process or one test.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::identity::PeerIdentity;
use crate::message::{PeerMetadata, SyncMessage};
use crate::transport::{ConnectionId, Endpoint, Transport, TransportError, TransportEvent};

#[derive(Debug)]
enum Frame {
    Incoming {
        connection: ConnectionId,
        metadata: PeerMetadata,
    },
    Data {
        connection: ConnectionId,
        payload: String,
    },
    Closed {
        connection: ConnectionId,
    },
}

#[derive(Debug)]
struct Link {
    initiator: PeerIdentity,
    acceptor: PeerIdentity,
}

impl Link {
    fn other(&self, me: &PeerIdentity) -> Option<&PeerIdentity> {
        if &self.initiator == me {
            Some(&self.acceptor)
        } else if &self.acceptor == me {
            Some(&self.initiator)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct Hub {
    endpoints: HashMap<PeerIdentity, mpsc::UnboundedSender<Frame>>,
    links: HashMap<ConnectionId, Link>,
    next_connection: u64,
}

impl Hub {
    fn notify(&self, identity: &PeerIdentity, frame: Frame) -> bool {
        self.endpoints
            .get(identity)
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    fn close_link(&mut self, connection: ConnectionId) {
        if let Some(link) = self.links.remove(&connection) {
            self.notify(&link.initiator, Frame::Closed { connection });
            self.notify(&link.acceptor, Frame::Closed { connection });
        }
    }

    fn unregister(&mut self, identity: &PeerIdentity) {
        self.endpoints.remove(identity);
        let owned: Vec<ConnectionId> = self
            .links
            .iter()
            .filter(|(_, link)| link.other(identity).is_some())
            .map(|(id, _)| *id)
            .collect();
        for connection in owned {
            self.close_link(connection);
        }
    }
}

/// Shared signaling hub. Clones refer to the same network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> Result<MutexGuard<'_, Hub>, TransportError> {
        self.hub
            .lock()
            .map_err(|e| TransportError::Backend(e.to_string()))
    }

    #[must_use]
    pub fn is_registered(&self, identity: &PeerIdentity) -> bool {
        self.hub()
            .map(|hub| hub.endpoints.contains_key(identity))
            .unwrap_or(false)
    }

    /// Push a raw payload to `to` on `connection`, bypassing the codec.
    #[cfg(test)]
    pub(crate) fn deliver_raw(
        &self,
        to: &PeerIdentity,
        connection: ConnectionId,
        payload: &str,
    ) -> bool {
        self.hub().is_ok_and(|hub| {
            hub.notify(
                to,
                Frame::Data {
                    connection,
                    payload: payload.to_owned(),
                },
            )
        })
    }

    /// Number of open connections across the whole network.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.hub().map(|hub| hub.links.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for LoopbackNetwork {
    async fn register(&self, identity: PeerIdentity) -> Result<Box<dyn Endpoint>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut hub = self.hub()?;
            if hub.endpoints.contains_key(&identity) {
                return Err(TransportError::AlreadyTaken(identity));
            }
            hub.endpoints.insert(identity.clone(), tx);
        }
        Ok(Box::new(LoopbackEndpoint {
            identity,
            network: self.clone(),
            frames: rx,
            destroyed: false,
        }))
    }
}

pub struct LoopbackEndpoint {
    identity: PeerIdentity,
    network: LoopbackNetwork,
    frames: mpsc::UnboundedReceiver<Frame>,
    destroyed: bool,
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    async fn connect(
        &mut self,
        target: &PeerIdentity,
        metadata: PeerMetadata,
    ) -> Result<ConnectionId, TransportError> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        let mut hub = self.network.hub()?;
        if target == &self.identity || !hub.endpoints.contains_key(target) {
            return Err(TransportError::Unreachable(target.clone()));
        }

        hub.next_connection += 1;
        let connection = ConnectionId::new(hub.next_connection);
        hub.links.insert(
            connection,
            Link {
                initiator: self.identity.clone(),
                acceptor: target.clone(),
            },
        );
        if !hub.notify(target, Frame::Incoming { connection, metadata }) {
            hub.links.remove(&connection);
            return Err(TransportError::Unreachable(target.clone()));
        }
        Ok(connection)
    }

    fn send(&self, connection: ConnectionId, message: &SyncMessage) -> Result<(), TransportError> {
        let payload = message.encode()?;
        let hub = self.network.hub()?;
        let other = hub
            .links
            .get(&connection)
            .and_then(|link| link.other(&self.identity))
            .ok_or(TransportError::NotOpen(connection))?;
        if hub.notify(other, Frame::Data { connection, payload }) {
            Ok(())
        } else {
            Err(TransportError::NotOpen(connection))
        }
    }

    fn close(&self, connection: ConnectionId) {
        if let Ok(mut hub) = self.network.hub() {
            let owned = hub
                .links
                .get(&connection)
                .is_some_and(|link| link.other(&self.identity).is_some());
            if owned {
                hub.close_link(connection);
            }
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        let frame = self.frames.recv().await?;
        Some(match frame {
            Frame::Incoming {
                connection,
                metadata,
            } => TransportEvent::Incoming {
                connection,
                metadata,
            },
            Frame::Data {
                connection,
                payload,
            } => match SyncMessage::decode(&payload) {
                Ok(message) => TransportEvent::Message {
                    connection,
                    message,
                },
                Err(err) => TransportEvent::Malformed {
                    connection,
                    reason: err.to_string(),
                },
            },
            Frame::Closed { connection } => TransportEvent::Closed { connection },
        })
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Ok(mut hub) = self.network.hub() {
            hub.unregister(&self.identity);
        }
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.destroy();
    }
}
