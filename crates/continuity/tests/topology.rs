use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use continuity::{
    Delivery, DeviceClass, Endpoint, HeartbeatConfig, InitialSync, LoopbackNetwork, PeerEvent,
    PeerIdentity, PeerMetadata, PeerSession, QuestionUpdate, Role, SyncMessage, SyncSnapshot,
    Transport, TransportError,
};
use quiz_core::model::{Answer, AnswerId, Question, QuestionId, QuizId, ReoccurrenceCounter, UserId};
use quiz_core::time::fixed_now;

fn metadata(name: &str) -> PeerMetadata {
    PeerMetadata::new(name, DeviceClass::Laptop)
}

fn question(id: u64) -> Question {
    Question::new(
        QuestionId::new(id),
        format!("Question {id}"),
        false,
        vec![
            Answer::new(AnswerId::new(1), "yes", true),
            Answer::new(AnswerId::new(2), "no", false),
        ],
    )
}

fn snapshot(current: u64, correct: u32, wrong: u32) -> SyncSnapshot {
    SyncSnapshot {
        start_time: fixed_now() - chrono::Duration::seconds(90),
        correct_count: correct,
        wrong_count: wrong,
        reoccurrences: vec![
            ReoccurrenceCounter::new(QuestionId::new(1), 2),
            ReoccurrenceCounter::new(QuestionId::new(2), 1),
        ],
        question: Some(question(current)),
        selected_answers: vec![AnswerId::new(2)],
    }
}

async fn join(net: &LoopbackNetwork, name: &str, now: DateTime<Utc>) -> PeerSession {
    let transport: Arc<dyn Transport> = Arc::new(net.clone());
    PeerSession::start(
        transport,
        QuizId::new(42),
        UserId::new(7),
        metadata(name),
        HeartbeatConfig::default(),
        now,
    )
    .await
}

/// Handle exactly one queued transport event.
async fn pump(session: &mut PeerSession, snapshot: &SyncSnapshot, now: DateTime<Utc>) -> Vec<PeerEvent> {
    let event = tokio::time::timeout(Duration::from_secs(1), session.next_event())
        .await
        .expect("an event should be queued")
        .expect("endpoint alive");
    session.handle(event, snapshot, now).await
}

async fn assert_idle(session: &mut PeerSession) {
    let waited = tokio::time::timeout(Duration::from_millis(50), session.next_event()).await;
    assert!(waited.is_err(), "expected no pending events, got {waited:?}");
}

async fn drain_handshake(client: &mut PeerSession, now: DateTime<Utc>) {
    let idle = snapshot(1, 0, 0);
    assert!(matches!(
        pump(client, &idle, now).await.as_slice(),
        [PeerEvent::Sync(Delivery::InitialSync(_))]
    ));
    assert!(matches!(
        pump(client, &idle, now).await.as_slice(),
        [PeerEvent::Sync(Delivery::QuestionUpdate(_))]
    ));
}

#[tokio::test]
async fn second_device_becomes_client_and_receives_state_then_question() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let host_state = snapshot(2, 5, 3);

    let mut a = join(&net, "A", now).await;
    assert_eq!(a.role(), Role::Host);
    assert_eq!(a.local_identity(), Some(a.host_identity()));

    let mut b = join(&net, "B", now).await;
    assert_eq!(b.role(), Role::Client);
    assert_ne!(b.local_identity(), Some(b.host_identity()));

    assert_eq!(pump(&mut a, &host_state, now).await, vec![PeerEvent::PeersChanged]);
    let peers = a.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].metadata, Some(metadata("B")));
    assert!(!peers[0].is_host);

    let first = pump(&mut b, &snapshot(1, 0, 0), now).await;
    assert_eq!(
        first,
        vec![PeerEvent::Sync(Delivery::InitialSync(InitialSync {
            start_time: host_state.start_time,
            correct_count: 5,
            wrong_count: 3,
            reoccurrences: host_state.reoccurrences.clone(),
        }))]
    );
    let second = pump(&mut b, &snapshot(1, 0, 0), now).await;
    assert_eq!(
        second,
        vec![PeerEvent::Sync(Delivery::QuestionUpdate(QuestionUpdate {
            question: host_state.question.clone(),
            selected_answers: host_state.selected_answers.clone(),
        }))]
    );

    assert!(b.peers()[0].is_host);
    assert!(a.is_authoritative_writer());
    assert!(!b.is_authoritative_writer());
}

#[tokio::test]
async fn host_relays_client_update_to_other_clients_only() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let host_state = snapshot(1, 0, 0);

    let mut a = join(&net, "A", now).await;
    let mut b = join(&net, "B", now).await;
    let mut c = join(&net, "C", now).await;
    pump(&mut a, &host_state, now).await;
    pump(&mut a, &host_state, now).await;
    drain_handshake(&mut b, now).await;
    drain_handshake(&mut c, now).await;

    let update = QuestionUpdate {
        question: Some(question(2)),
        selected_answers: vec![AnswerId::new(1)],
    };
    b.send_to_all(&SyncMessage::QuestionUpdate(update.clone()));

    assert_eq!(
        pump(&mut a, &host_state, now).await,
        vec![PeerEvent::Sync(Delivery::QuestionUpdate(update.clone()))]
    );
    assert_eq!(
        pump(&mut c, &host_state, now).await,
        vec![PeerEvent::Sync(Delivery::QuestionUpdate(update))]
    );
    assert_idle(&mut b).await;
}

#[tokio::test]
async fn client_promotes_itself_when_host_disappears() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let state = snapshot(1, 0, 0);

    let mut a = join(&net, "A", now).await;
    let mut b = join(&net, "B", now).await;
    pump(&mut a, &state, now).await;
    drain_handshake(&mut b, now).await;

    a.shutdown();
    assert_eq!(a.role(), Role::Undetermined);

    let events = pump(&mut b, &state, now).await;
    assert!(events.contains(&PeerEvent::RoleChanged(Role::Host)));
    assert_eq!(b.role(), Role::Host);
    assert!(b.peers().is_empty());

    let mut d = join(&net, "D", now).await;
    assert_eq!(d.role(), Role::Client);
    assert_eq!(pump(&mut b, &state, now).await, vec![PeerEvent::PeersChanged]);
    assert_eq!(b.peers()[0].metadata, Some(metadata("D")));
    drain_handshake(&mut d, now).await;
}

#[tokio::test]
async fn surviving_clients_converge_on_a_single_new_host() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let state = snapshot(1, 0, 0);

    let mut a = join(&net, "A", now).await;
    let mut b = join(&net, "B", now).await;
    let mut c = join(&net, "C", now).await;
    pump(&mut a, &state, now).await;
    pump(&mut a, &state, now).await;
    drain_handshake(&mut b, now).await;
    drain_handshake(&mut c, now).await;

    drop(a);

    pump(&mut b, &state, now).await;
    assert_eq!(b.role(), Role::Host);

    // C's reconnect reaches the new holder of the host identity.
    let events = pump(&mut c, &state, now).await;
    assert_eq!(events, vec![PeerEvent::PeersChanged]);
    assert_eq!(c.role(), Role::Client);

    assert_eq!(pump(&mut b, &state, now).await, vec![PeerEvent::PeersChanged]);
    assert_eq!(b.peers().len(), 1);
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let state = snapshot(1, 0, 0);

    let mut a = join(&net, "A", now).await;
    let mut b = join(&net, "B", now).await;
    pump(&mut a, &state, now).await;
    drain_handshake(&mut b, now).await;

    b.heartbeat_tick(now);
    assert!(pump(&mut a, &state, now).await.is_empty());
    assert!(pump(&mut b, &state, now).await.is_empty());
    assert_eq!(b.role(), Role::Client);
    assert!(b.has_connections());
}

#[tokio::test]
async fn silent_peer_is_dropped_after_heartbeat_timeout() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let state = snapshot(1, 0, 0);

    let mut a = join(&net, "A", now).await;
    let mut b = join(&net, "B", now).await;
    pump(&mut a, &state, now).await;
    drain_handshake(&mut b, now).await;

    let later = now + chrono::Duration::seconds(16);
    a.heartbeat_tick(later);

    assert_eq!(pump(&mut a, &state, later).await, vec![PeerEvent::PeersChanged]);
    assert!(!a.has_connections());

    // The host is still registered, so the client simply reconnects.
    assert_eq!(pump(&mut b, &state, later).await, vec![PeerEvent::PeersChanged]);
    assert_eq!(b.role(), Role::Client);
    assert_eq!(pump(&mut a, &state, later).await, vec![PeerEvent::PeersChanged]);
    assert!(a.has_connections());
}

#[tokio::test]
async fn sends_to_closed_connections_are_noops() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let state = snapshot(1, 0, 0);

    let mut a = join(&net, "A", now).await;
    let mut b = join(&net, "B", now).await;
    pump(&mut a, &state, now).await;
    drain_handshake(&mut b, now).await;
    let connection = a.peers()[0].connection;

    b.shutdown();
    a.send_to(connection, &SyncMessage::AnswerChecked);
    a.send_to_all_except(connection, &SyncMessage::AnswerChecked);
    assert_eq!(pump(&mut a, &state, now).await, vec![PeerEvent::PeersChanged]);
    a.send_to_all(&SyncMessage::AnswerChecked);
    assert!(a.peers().is_empty());
    assert_eq!(net.connection_count(), 0);
}

/// Loopback network whose first `failures` registrations fail.
struct FlakyNetwork {
    inner: LoopbackNetwork,
    failures: AtomicUsize,
}

#[async_trait]
impl Transport for FlakyNetwork {
    async fn register(&self, identity: PeerIdentity) -> Result<Box<dyn Endpoint>, TransportError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Backend("signaling server offline".into()));
        }
        self.inner.register(identity).await
    }
}

#[tokio::test]
async fn detached_session_rejoins_on_a_later_attempt() {
    let net = LoopbackNetwork::new();
    let now = fixed_now();
    let state = snapshot(1, 0, 0);
    let flaky: Arc<dyn Transport> = Arc::new(FlakyNetwork {
        inner: net.clone(),
        failures: AtomicUsize::new(1),
    });

    let mut a = PeerSession::start(
        flaky,
        QuizId::new(42),
        UserId::new(7),
        metadata("A"),
        HeartbeatConfig::default(),
        now,
    )
    .await;
    assert_eq!(a.role(), Role::Undetermined);
    assert_eq!(a.local_identity(), None);

    let events = a.rejoin_if_detached(now).await;
    assert_eq!(events, vec![PeerEvent::RoleChanged(Role::Host), PeerEvent::PeersChanged]);
    assert_eq!(a.role(), Role::Host);
    assert!(a.rejoin_if_detached(now).await.is_empty());

    let mut b = join(&net, "B", now).await;
    assert_eq!(b.role(), Role::Client);
    assert_eq!(pump(&mut a, &state, now).await, vec![PeerEvent::PeersChanged]);
    drain_handshake(&mut b, now).await;
}
