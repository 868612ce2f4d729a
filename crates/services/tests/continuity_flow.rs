use std::sync::Arc;
use std::time::Duration;

use continuity::{DeviceClass, LoopbackNetwork, PeerEvent, Role, host_identity};
use quiz_core::model::{
    Answer, AnswerId, Question, QuestionId, Quiz, QuizId, SessionSettings, UserId,
};
use quiz_core::time::fixed_now;
use services::{Clock, DeviceConfig, InMemoryApi, QuizSession, QuizSessionService};
use storage::InMemoryStore;

const QUIZ: QuizId = QuizId::new(42);
const USER: UserId = UserId::new(7);

fn quiz() -> Quiz {
    let questions = (1..=3)
        .map(|id| {
            Question::new(
                QuestionId::new(id),
                format!("Question {id}"),
                false,
                vec![
                    Answer::new(AnswerId::new(id * 10), "right", true),
                    Answer::new(AnswerId::new(id * 10 + 1), "wrong", false),
                    Answer::new(AnswerId::new(id * 10 + 2), "also wrong", false),
                ],
            )
        })
        .collect();
    Quiz::new(QUIZ, "Continuity", 1, questions)
}

fn api() -> InMemoryApi {
    InMemoryApi::new()
        .with_quiz(quiz())
        .with_settings(SessionSettings {
            sync_progress: true,
            initial_repetitions: 2,
            wrong_answer_repetitions: 1,
        })
}

async fn device(net: &LoopbackNetwork, api: &InMemoryApi, name: &str, seed: u64) -> QuizSession {
    let device = DeviceConfig {
        device_name: name.into(),
        device_class: DeviceClass::Laptop,
    };
    QuizSessionService::new(
        Clock::fixed(fixed_now()),
        Arc::new(api.clone()),
        Arc::new(api.clone()),
        Arc::new(InMemoryStore::new()),
    )
    .with_account(USER, Arc::new(api.clone()))
    .with_continuity(Arc::new(net.clone()), &device)
    .with_seed(seed)
    .open(QUIZ)
    .await
    .unwrap()
}

/// Handle exactly one queued transport event.
async fn pump(session: &mut QuizSession) -> Vec<PeerEvent> {
    let event = tokio::time::timeout(Duration::from_secs(1), session.next_transport_event())
        .await
        .expect("an event should be queued")
        .expect("endpoint alive");
    session.handle_transport_event(event).await
}

fn wrong_answer(session: &QuizSession) -> Vec<AnswerId> {
    let question = session.current_question().unwrap();
    vec![question.answers.iter().find(|a| !a.correct).unwrap().id]
}

#[tokio::test]
async fn joining_device_adopts_host_state() {
    let net = LoopbackNetwork::new();
    let api = api();

    let mut a = device(&net, &api, "A", 1).await;
    assert_eq!(a.role(), Some(Role::Host));
    let answers = wrong_answer(&a);
    a.submit_answer(answers).await;
    a.advance().await;

    let mut b = device(&net, &api, "B", 2).await;
    assert_eq!(b.role(), Some(Role::Client));
    assert!(!b.is_authoritative_writer());

    pump(&mut a).await;
    assert_eq!(a.view().peers.len(), 1);
    assert_eq!(a.view().peers[0].device_name.as_deref(), Some("B"));

    pump(&mut b).await;
    pump(&mut b).await;
    assert_eq!(b.progress().reoccurrences, a.progress().reoccurrences);
    assert_eq!(b.progress().wrong_count, 1);
    assert_eq!(b.current_question(), a.current_question());
    assert_eq!(b.study_time_seconds(), a.study_time_seconds());
    assert!(b.view().peers[0].is_host);
}

#[tokio::test]
async fn client_answers_are_checked_everywhere_but_written_by_host() {
    let net = LoopbackNetwork::new();
    let api = api();

    let mut a = device(&net, &api, "A", 1).await;
    let mut b = device(&net, &api, "B", 2).await;
    pump(&mut a).await;
    pump(&mut b).await;
    pump(&mut b).await;

    let writes = api.progress_writes();
    let answers = wrong_answer(&b);
    b.submit_answer(answers.clone()).await;
    assert_eq!(api.progress_writes(), writes);

    // question_update with the selection, then answer_checked.
    pump(&mut a).await;
    assert_eq!(a.view().selected_answers, answers);
    pump(&mut a).await;
    assert_eq!(a.view().checked, b.view().checked);
    assert_eq!(a.progress().reoccurrences, b.progress().reoccurrences);
    assert_eq!(api.progress_writes(), writes + 1);
}

#[tokio::test]
async fn host_relays_between_clients() {
    let net = LoopbackNetwork::new();
    let api = api();

    let mut a = device(&net, &api, "A", 1).await;
    let mut b = device(&net, &api, "B", 2).await;
    let mut c = device(&net, &api, "C", 3).await;
    pump(&mut a).await;
    pump(&mut a).await;
    for client in [&mut b, &mut c] {
        pump(client).await;
        pump(client).await;
    }

    b.advance().await;
    pump(&mut a).await;
    pump(&mut c).await;
    assert_eq!(c.current_question(), b.current_question());
    assert_eq!(a.current_question(), b.current_question());

    let waited =
        tokio::time::timeout(Duration::from_millis(50), b.next_transport_event()).await;
    assert!(waited.is_err(), "origin must not receive its own update");
}

#[tokio::test]
async fn client_takes_over_when_host_leaves() {
    let net = LoopbackNetwork::new();
    let api = api();

    let mut a = device(&net, &api, "A", 1).await;
    let mut b = device(&net, &api, "B", 2).await;
    pump(&mut a).await;
    pump(&mut b).await;
    pump(&mut b).await;
    let question = b.current_question().cloned();

    a.close().await;
    assert_eq!(a.role(), None);

    let events = pump(&mut b).await;
    assert!(events.contains(&PeerEvent::RoleChanged(Role::Host)));
    assert_eq!(b.role(), Some(Role::Host));
    assert!(b.is_authoritative_writer());
    assert_eq!(b.current_question().cloned(), question);

    let mut d = device(&net, &api, "D", 4).await;
    assert_eq!(d.role(), Some(Role::Client));
    pump(&mut b).await;
    pump(&mut d).await;
    pump(&mut d).await;
    assert_eq!(d.current_question(), b.current_question());
}

#[tokio::test]
async fn disabling_sync_leaves_the_session() {
    let net = LoopbackNetwork::new();
    let api = api();

    let mut a = device(&net, &api, "A", 1).await;
    assert!(net.is_registered(&host_identity(QUIZ, USER)));

    a.set_sync_enabled(false).await.unwrap();
    assert_eq!(a.role(), None);
    assert!(!a.view().sync_enabled);
    assert!(!api.settings().sync_progress);
    assert!(!net.is_registered(&host_identity(QUIZ, USER)));

    a.set_sync_enabled(true).await.unwrap();
    assert_eq!(a.role(), Some(Role::Host));
}

#[tokio::test]
async fn failed_settings_patch_keeps_continuity_running() {
    let net = LoopbackNetwork::new();
    let api = api();
    let mut a = device(&net, &api, "A", 1).await;

    api.set_offline(true);
    assert!(a.set_sync_enabled(false).await.is_err());
    assert_eq!(a.role(), Some(Role::Host));
}
