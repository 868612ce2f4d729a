//! Transport-free protocol rules.
//!
//! Routing is a pure function of the local role, the origin connection,
//! the set of open connections and the inbound message. `PeerSession`
//! performs the resulting sends.

use chrono::{DateTime, Duration, Utc};

use quiz_core::model::{AnswerId, Question, ReoccurrenceCounter};

use crate::message::{InitialSync, PeerMetadata, QuestionUpdate, SyncMessage};
use crate::transport::ConnectionId;

/// Local role within the star topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    Host,
    Client,
    #[default]
    Undetermined,
}

//
// ─── CONNECTION STATE MACHINE ──────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    /// `Connecting -> Open`. Any other state is unchanged.
    #[must_use]
    pub fn opened(self) -> Self {
        match self {
            ConnectionState::Connecting => ConnectionState::Open,
            other => other,
        }
    }

    /// Every state ends in `Closed`.
    #[must_use]
    pub fn closed(self) -> Self {
        ConnectionState::Closed
    }
}

/// One channel to a remote device.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConnection {
    pub id: ConnectionId,
    /// Handshake metadata. Only known on the accepting (host) side.
    pub metadata: Option<PeerMetadata>,
    /// True on a client for its link to the host.
    pub is_host_link: bool,
    pub state: ConnectionState,
    pub last_seen: DateTime<Utc>,
}

impl PeerConnection {
    #[must_use]
    pub fn connecting(
        id: ConnectionId,
        metadata: Option<PeerMetadata>,
        is_host_link: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            metadata,
            is_host_link,
            state: ConnectionState::Connecting,
            last_seen: now,
        }
    }

    pub fn mark_open(&mut self, now: DateTime<Utc>) {
        self.state = self.state.opened();
        self.last_seen = now;
    }

    pub fn mark_closed(&mut self) {
        self.state = self.state.closed();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// True if nothing arrived on this connection for longer than `timeout`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_seen) > timeout
    }
}

//
// ─── SNAPSHOT & HANDSHAKE ──────────────────────────────────────────────────────
//

/// The controller's current state, handed to the peer session with every
/// event so no callback observes a stale copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub start_time: DateTime<Utc>,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub reoccurrences: Vec<ReoccurrenceCounter>,
    pub question: Option<Question>,
    pub selected_answers: Vec<AnswerId>,
}

impl SyncSnapshot {
    /// Messages the host sends to a newly opened connection, in send order:
    /// counters first, then the question they apply to.
    #[must_use]
    pub fn handshake(&self) -> [SyncMessage; 2] {
        [
            SyncMessage::InitialSync(InitialSync {
                start_time: self.start_time,
                correct_count: self.correct_count,
                wrong_count: self.wrong_count,
                reoccurrences: self.reoccurrences.clone(),
            }),
            self.question_update(),
        ]
    }

    #[must_use]
    pub fn question_update(&self) -> SyncMessage {
        SyncMessage::QuestionUpdate(QuestionUpdate {
            question: self.question.clone(),
            selected_answers: self.selected_answers.clone(),
        })
    }
}

//
// ─── ROUTING ───────────────────────────────────────────────────────────────────
//

/// Inbound state change the controller must apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    InitialSync(InitialSync),
    QuestionUpdate(QuestionUpdate),
    AnswerChecked,
}

/// What to do with one inbound message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reaction {
    pub deliver: Option<Delivery>,
    pub outgoing: Vec<(ConnectionId, SyncMessage)>,
}

/// Route an inbound `message` received on `origin`.
///
/// State updates are delivered locally; a host additionally relays them to
/// every open connection except the origin. Clients never relay. Pings are
/// answered on the same connection. `initial_sync` only counts on a client.
#[must_use]
pub fn react(
    role: Role,
    origin: ConnectionId,
    open: &[ConnectionId],
    message: SyncMessage,
) -> Reaction {
    let relay = |message: &SyncMessage| -> Vec<(ConnectionId, SyncMessage)> {
        if role != Role::Host {
            return Vec::new();
        }
        open.iter()
            .filter(|id| **id != origin)
            .map(|id| (*id, message.clone()))
            .collect()
    };

    match message {
        SyncMessage::Ping => Reaction {
            deliver: None,
            outgoing: vec![(origin, SyncMessage::Pong)],
        },
        SyncMessage::Pong => Reaction::default(),
        SyncMessage::InitialSync(sync) => match role {
            Role::Client => Reaction {
                deliver: Some(Delivery::InitialSync(sync)),
                outgoing: Vec::new(),
            },
            Role::Host | Role::Undetermined => Reaction::default(),
        },
        SyncMessage::QuestionUpdate(update) => {
            let outgoing = relay(&SyncMessage::QuestionUpdate(update.clone()));
            Reaction {
                deliver: Some(Delivery::QuestionUpdate(update)),
                outgoing,
            }
        }
        SyncMessage::AnswerChecked => Reaction {
            deliver: Some(Delivery::AnswerChecked),
            outgoing: relay(&SyncMessage::AnswerChecked),
        },
    }
}
