use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use quiz_core::model::{QuizId, UserId};

use crate::identity::{PeerIdentity, host_identity};
use crate::message::{PeerMetadata, SyncMessage};
use crate::protocol::{Delivery, PeerConnection, Role, SyncSnapshot, react};
use crate::transport::{ConnectionId, Endpoint, Transport, TransportError, TransportEvent};

/// Attempts at claiming a role before giving up for this round.
const MAX_ROLE_ATTEMPTS: usize = 3;

/// Liveness probing cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Something the controller has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Sync(Delivery),
    PeersChanged,
    RoleChanged(Role),
}

/// UI-facing description of one open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub connection: ConnectionId,
    pub metadata: Option<PeerMetadata>,
    /// True if the remote side of this connection is the host.
    pub is_host: bool,
}

/// Lifecycle of this device's participation in live sync.
pub struct PeerSession {
    transport: Arc<dyn Transport>,
    host_identity: PeerIdentity,
    metadata: PeerMetadata,
    heartbeat: HeartbeatConfig,
    role: Role,
    endpoint: Option<Box<dyn Endpoint>>,
    connections: BTreeMap<ConnectionId, PeerConnection>,
    left: bool,
}

impl PeerSession {
    /// Join (or found) the session for `(quiz_id, user_id)`.
    ///
    /// Never fails: if no role can be claimed the session stays
    /// `Role::Undetermined` and behaves as a lone device.
    pub async fn start(
        transport: Arc<dyn Transport>,
        quiz_id: QuizId,
        user_id: UserId,
        metadata: PeerMetadata,
        heartbeat: HeartbeatConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self {
            transport,
            host_identity: host_identity(quiz_id, user_id),
            metadata,
            heartbeat,
            role: Role::Undetermined,
            endpoint: None,
            connections: BTreeMap::new(),
            left: false,
        };
        session.establish(now).await;
        session
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    #[must_use]
    pub fn host_identity(&self) -> &PeerIdentity {
        &self.host_identity
    }

    #[must_use]
    pub fn local_identity(&self) -> Option<&PeerIdentity> {
        self.endpoint.as_ref().map(|endpoint| endpoint.identity())
    }

    fn open_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|conn| conn.is_open())
            .map(|conn| conn.id)
            .collect()
    }

    #[must_use]
    pub fn has_connections(&self) -> bool {
        self.connections.values().any(PeerConnection::is_open)
    }

    /// Whether this device may write progress to the remote store.
    #[must_use]
    pub fn is_authoritative_writer(&self) -> bool {
        self.role == Role::Host || !self.has_connections()
    }

    #[must_use]
    pub fn peers(&self) -> Vec<PeerSummary> {
        self.connections
            .values()
            .filter(|conn| conn.is_open())
            .map(|conn| PeerSummary {
                connection: conn.id,
                metadata: conn.metadata.clone(),
                is_host: conn.is_host_link,
            })
            .collect()
    }

    //
    // ─── ROLE RESOLUTION ───────────────────────────────────────────────────────
    //

    /// Claim the host identity, or connect to whoever holds it.
    async fn establish(&mut self, now: DateTime<Utc>) {
        for _ in 0..MAX_ROLE_ATTEMPTS {
            match self.transport.register(self.host_identity.clone()).await {
                Ok(endpoint) => {
                    info!(identity = %self.host_identity, "registered as continuity host");
                    self.endpoint = Some(endpoint);
                    self.role = Role::Host;
                    return;
                }
                Err(TransportError::AlreadyTaken(_)) => {
                    if self.join_as_client(now).await {
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "continuity registration failed");
                    break;
                }
            }
        }
        self.role = Role::Undetermined;
    }

    async fn join_as_client(&mut self, now: DateTime<Utc>) -> bool {
        let mut endpoint = match self.transport.register(PeerIdentity::random()).await {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(error = %err, "could not register client endpoint");
                return false;
            }
        };
        match endpoint
            .connect(&self.host_identity, self.metadata.clone())
            .await
        {
            Ok(connection) => {
                info!(host = %self.host_identity, %connection, "joined continuity host");
                self.endpoint = Some(endpoint);
                self.add_host_link(connection, now);
                self.role = Role::Client;
                true
            }
            Err(err) => {
                debug!(error = %err, "host identity taken but unreachable");
                endpoint.destroy();
                false
            }
        }
    }

    fn add_host_link(&mut self, connection: ConnectionId, now: DateTime<Utc>) {
        let mut link = PeerConnection::connecting(connection, None, true, now);
        link.mark_open(now);
        self.connections.insert(connection, link);
    }

    //
    // ─── EVENT HANDLING ────────────────────────────────────────────────────────
    //

    /// Wait for the next transport event. `None` when no endpoint is held.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.endpoint.as_mut() {
            Some(endpoint) => endpoint.next_event().await,
            None => None,
        }
    }

    /// Apply one transport event against the controller's `snapshot`.
    pub async fn handle(
        &mut self,
        event: TransportEvent,
        snapshot: &SyncSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<PeerEvent> {
        match event {
            TransportEvent::Incoming {
                connection,
                metadata,
            } => self.accept(connection, metadata, snapshot, now),
            TransportEvent::Message {
                connection,
                message,
            } => self.receive(connection, message, now),
            TransportEvent::Closed { connection } => self.on_closed(connection, now).await,
            TransportEvent::Malformed { connection, reason } => {
                warn!(%connection, %reason, "dropping malformed continuity message");
                Vec::new()
            }
            TransportEvent::Error { connection, reason } => {
                warn!(%connection, %reason, "continuity connection error");
                self.close(connection);
                Vec::new()
            }
        }
    }

    fn accept(
        &mut self,
        connection: ConnectionId,
        metadata: PeerMetadata,
        snapshot: &SyncSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<PeerEvent> {
        if self.role != Role::Host {
            debug!(%connection, "rejecting inbound connection while not host");
            self.close(connection);
            return Vec::new();
        }
        info!(%connection, device = %metadata.device_name, "continuity peer joined");
        let mut peer = PeerConnection::connecting(connection, Some(metadata), false, now);
        peer.mark_open(now);
        self.connections.insert(connection, peer);

        for message in snapshot.handshake() {
            self.send_to(connection, &message);
        }
        vec![PeerEvent::PeersChanged]
    }

    fn receive(
        &mut self,
        connection: ConnectionId,
        message: SyncMessage,
        now: DateTime<Utc>,
    ) -> Vec<PeerEvent> {
        match self.connections.get_mut(&connection) {
            Some(peer) if peer.is_open() => peer.touch(now),
            _ => {
                debug!(%connection, kind = message.kind(), "dropping message from unknown connection");
                return Vec::new();
            }
        }

        let reaction = react(self.role, connection, &self.open_ids(), message);
        for (target, outgoing) in &reaction.outgoing {
            self.send_to(*target, outgoing);
        }
        reaction
            .deliver
            .map(PeerEvent::Sync)
            .into_iter()
            .collect()
    }

    async fn on_closed(&mut self, connection: ConnectionId, now: DateTime<Utc>) -> Vec<PeerEvent> {
        let Some(mut closed) = self.connections.remove(&connection) else {
            return Vec::new();
        };
        closed.mark_closed();
        info!(%connection, "continuity connection closed");

        if self.role == Role::Client && closed.is_host_link {
            return self.fail_over(now).await;
        }
        vec![PeerEvent::PeersChanged]
    }

    /// Host link lost: reconnect, or promote if the host is really gone.
    async fn fail_over(&mut self, now: DateTime<Utc>) -> Vec<PeerEvent> {
        let previous = self.role;

        if let Some(endpoint) = self.endpoint.as_mut() {
            match endpoint
                .connect(&self.host_identity, self.metadata.clone())
                .await
            {
                Ok(connection) => {
                    info!(%connection, "reconnected to continuity host");
                    self.add_host_link(connection, now);
                    return vec![PeerEvent::PeersChanged];
                }
                Err(err) => debug!(error = %err, "continuity host unreachable, attempting promotion"),
            }
        }

        self.drop_endpoint();
        self.establish(now).await;

        let mut events = vec![PeerEvent::PeersChanged];
        if self.role != previous {
            info!(role = ?self.role, "continuity role changed");
            events.push(PeerEvent::RoleChanged(self.role));
        }
        events
    }

    //
    // ─── HEARTBEAT ─────────────────────────────────────────────────────────────
    //

    /// Retry role resolution if an earlier attempt left no endpoint.
    pub async fn rejoin_if_detached(&mut self, now: DateTime<Utc>) -> Vec<PeerEvent> {
        if self.left || self.endpoint.is_some() {
            return Vec::new();
        }
        self.establish(now).await;
        if self.role == Role::Undetermined {
            return Vec::new();
        }
        info!(role = ?self.role, "rejoined continuity session");
        vec![PeerEvent::RoleChanged(self.role), PeerEvent::PeersChanged]
    }

    /// Probe every open connection and close the ones that went silent.
    ///
    /// Closing drives the regular close path once the transport reports it.
    pub fn heartbeat_tick(&mut self, now: DateTime<Utc>) {
        let timeout = chrono::Duration::from_std(self.heartbeat.timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        let (stale, alive): (Vec<_>, Vec<_>) = self
            .connections
            .values()
            .filter(|conn| conn.is_open())
            .map(|conn| (conn.id, conn.is_stale(now, timeout)))
            .partition(|(_, stale)| *stale);

        for (connection, _) in stale {
            warn!(%connection, "continuity heartbeat timed out");
            self.close(connection);
        }
        for (connection, _) in alive {
            self.send_to(connection, &SyncMessage::Ping);
        }
    }

    //
    // ─── SENDING ───────────────────────────────────────────────────────────────
    //

    pub fn send_to(&self, connection: ConnectionId, message: &SyncMessage) {
        let open = self
            .connections
            .get(&connection)
            .is_some_and(PeerConnection::is_open);
        let Some(endpoint) = self.endpoint.as_ref() else {
            return;
        };
        if !open {
            return;
        }
        if let Err(err) = endpoint.send(connection, message) {
            debug!(%connection, kind = message.kind(), error = %err, "continuity send failed");
        }
    }

    pub fn send_to_all(&self, message: &SyncMessage) {
        for connection in self.open_ids() {
            self.send_to(connection, message);
        }
    }

    pub fn send_to_all_except(&self, except: ConnectionId, message: &SyncMessage) {
        for connection in self.open_ids().into_iter().filter(|id| *id != except) {
            self.send_to(connection, message);
        }
    }

    fn close(&mut self, connection: ConnectionId) {
        if let Some(peer) = self.connections.get_mut(&connection) {
            peer.mark_closed();
        }
        if let Some(endpoint) = self.endpoint.as_ref() {
            endpoint.close(connection);
        }
    }

    fn drop_endpoint(&mut self) {
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.destroy();
        }
        self.connections.clear();
    }

    /// Leave the session. Destroying the endpoint closes every connection.
    pub fn shutdown(&mut self) {
        if self.endpoint.is_some() {
            info!(role = ?self.role, "leaving continuity session");
        }
        self.drop_endpoint();
        self.role = Role::Undetermined;
        self.left = true;
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.drop_endpoint();
    }
}
