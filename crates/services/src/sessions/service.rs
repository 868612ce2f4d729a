use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use continuity::{
    Delivery, HeartbeatConfig, InitialSync, PeerEvent, PeerMetadata, PeerSession, QuestionUpdate,
    Role, SyncMessage, SyncSnapshot, Transport, TransportEvent,
};
use quiz_core::model::{
    AnswerId, Progress, Question, Quiz, QuizId, SessionSettings, SettingsPatch, UserId,
};
use quiz_core::scheduler::score;
use quiz_core::time::{baseline_for, elapsed_seconds};
use quiz_core::{Clock, Scheduler, Verdict};
use storage::KeyValueStore;

use super::progress::ProgressStore;
use super::view::{PeerView, SessionView};
use crate::api::{ProgressRemote, QuizSource, SettingsSource};
use crate::config::DeviceConfig;
use crate::error::SessionError;

#[derive(Clone)]
struct Account {
    user_id: UserId,
    remote: Arc<dyn ProgressRemote>,
}

#[derive(Clone)]
struct Continuity {
    transport: Arc<dyn Transport>,
    metadata: PeerMetadata,
}

//
// ─── FACTORY ───────────────────────────────────────────────────────────────────
//

/// Opens quiz sessions against a fixed set of collaborators.
#[derive(Clone)]
pub struct QuizSessionService {
    clock: Clock,
    quizzes: Arc<dyn QuizSource>,
    settings: Arc<dyn SettingsSource>,
    local: Arc<dyn KeyValueStore>,
    account: Option<Account>,
    continuity: Option<Continuity>,
    heartbeat: HeartbeatConfig,
    seed: Option<u64>,
}

impl QuizSessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        quizzes: Arc<dyn QuizSource>,
        settings: Arc<dyn SettingsSource>,
        local: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            clock,
            quizzes,
            settings,
            local,
            account: None,
            continuity: None,
            heartbeat: HeartbeatConfig::default(),
            seed: None,
        }
    }

    /// Sign in `user_id`, enabling remote progress and continuity.
    #[must_use]
    pub fn with_account(mut self, user_id: UserId, remote: Arc<dyn ProgressRemote>) -> Self {
        self.account = Some(Account { user_id, remote });
        self
    }

    #[must_use]
    pub fn with_continuity(mut self, transport: Arc<dyn Transport>, device: &DeviceConfig) -> Self {
        self.continuity = Some(Continuity {
            transport,
            metadata: device.metadata(),
        });
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Seed question picks and answer shuffles.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Load `quiz_id`, resume or start progress, and join continuity if enabled.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::QuizUnavailable` if the quiz cannot be fetched.
    /// Every other failure degrades to defaults or local state.
    pub async fn open(&self, quiz_id: QuizId) -> Result<QuizSession, SessionError> {
        let now = self.clock.now();
        let quiz = self
            .quizzes
            .fetch_quiz(quiz_id)
            .await
            .map_err(|source| SessionError::QuizUnavailable { quiz_id, source })?;

        let settings = match self.settings.fetch_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "settings unavailable, using defaults");
                SessionSettings::default()
            }
        };
        let scheduler = Scheduler::try_new(
            settings.initial_repetitions,
            settings.wrong_answer_repetitions,
        )
        .unwrap_or_else(|err| {
            warn!(error = %err, "invalid initial repetitions, using the default");
            Scheduler::default().with_wrong_answer_repetitions(settings.wrong_answer_repetitions)
        });

        let mut store = ProgressStore::new(Arc::clone(&self.local));
        if let Some(account) = &self.account {
            store = store.with_remote(Arc::clone(&account.remote));
        }

        let (progress, started_at) = match store.load(quiz_id, settings.sync_progress, now).await {
            Some(loaded)
                if loaded
                    .progress
                    .current_question_id
                    .is_none_or(|id| quiz.contains(id)) =>
            {
                info!(%quiz_id, source = ?loaded.source, "resuming quiz progress");
                (loaded.progress, loaded.started_at)
            }
            Some(_) => {
                info!(%quiz_id, "stored progress points at a removed question, starting fresh");
                (Progress::fresh(Vec::new()), now)
            }
            None => (Progress::fresh(Vec::new()), now),
        };

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut session = QuizSession {
            clock: self.clock,
            rng,
            quiz,
            user_id: self.account.as_ref().map(|account| account.user_id),
            settings,
            scheduler,
            settings_source: Arc::clone(&self.settings),
            store,
            continuity: self.continuity.clone(),
            heartbeat: self.heartbeat,
            peer: None,
            progress,
            question: None,
            selected: Vec::new(),
            checked: None,
            started_at,
            ticking: false,
        };
        session.resume(now);
        session.start_peer().await;
        session.save().await;
        Ok(session)
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// A live quiz session on this device.
///
/// Owns the quiz snapshot and wires progress persistence, scheduling and the
/// peer session together. Every method runs on the caller's task.
pub struct QuizSession {
    clock: Clock,
    rng: StdRng,
    quiz: Quiz,
    user_id: Option<UserId>,
    settings: SessionSettings,
    scheduler: Scheduler,
    settings_source: Arc<dyn SettingsSource>,
    store: ProgressStore,
    continuity: Option<Continuity>,
    heartbeat: HeartbeatConfig,
    peer: Option<PeerSession>,

    progress: Progress,
    question: Option<Question>,
    selected: Vec<AnswerId>,
    checked: Option<Verdict>,
    /// Wall-clock instant study time counts from while ticking.
    started_at: DateTime<Utc>,
    ticking: bool,
}

impl QuizSession {
    #[must_use]
    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    #[must_use]
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.question.is_none()
    }

    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    /// Local role, or `None` while continuity is off.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.peer.as_ref().map(PeerSession::role)
    }

    #[must_use]
    pub fn peer(&self) -> Option<&PeerSession> {
        self.peer.as_ref()
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat.interval
    }

    /// Replace the time source, e.g. to move a fixed clock forward in tests.
    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    /// Host, or alone: the only devices allowed to write remote progress.
    #[must_use]
    pub fn is_authoritative_writer(&self) -> bool {
        self.peer
            .as_ref()
            .is_none_or(PeerSession::is_authoritative_writer)
    }

    #[must_use]
    pub fn study_time_seconds(&self) -> u64 {
        if self.ticking {
            elapsed_seconds(self.started_at, self.clock.now())
        } else {
            self.progress.study_time_seconds
        }
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            quiz_id: self.quiz.id,
            quiz_title: self.quiz.title.clone(),
            question: self.question.clone(),
            selected_answers: self.selected.clone(),
            checked: self.checked,
            is_finished: self.is_finished(),
            correct_count: self.progress.correct_count,
            wrong_count: self.progress.wrong_count,
            mastered_count: self.progress.mastered_count(),
            total_questions: self.quiz.questions.len(),
            study_time_seconds: self.study_time_seconds(),
            sync_enabled: self.settings.sync_progress,
            role: self.role(),
            peers: self
                .peer
                .as_ref()
                .map(|peer| peer.peers().into_iter().map(PeerView::from_summary).collect())
                .unwrap_or_default(),
        }
    }

    /// State handed to the peer session for handshakes.
    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            start_time: self.baseline(self.clock.now()),
            correct_count: self.progress.correct_count,
            wrong_count: self.progress.wrong_count,
            reoccurrences: self.progress.reoccurrences.clone(),
            question: self.question.clone(),
            selected_answers: self.selected.clone(),
        }
    }

    //
    // ─── UI OPERATIONS ─────────────────────────────────────────────────────────
    //

    /// Replace the selection for the current question and share it.
    ///
    /// Ignored once the question is checked or when the quiz is finished.
    pub fn select_answers(&mut self, answers: Vec<AnswerId>) -> bool {
        if self.question.is_none() || self.checked.is_some() {
            return false;
        }
        let mut selected = Vec::with_capacity(answers.len());
        for answer in answers {
            if !selected.contains(&answer) {
                selected.push(answer);
            }
        }
        self.selected = selected;
        self.broadcast(&self.question_update());
        true
    }

    /// Select `answers`, check them and tell peers to check too.
    pub async fn submit_answer(&mut self, answers: Vec<AnswerId>) -> Option<Verdict> {
        if !self.select_answers(answers) {
            return None;
        }
        let verdict = self.check_answer(self.clock.now())?;
        self.broadcast(&SyncMessage::AnswerChecked);
        self.save().await;
        Some(verdict)
    }

    /// Move on to a freshly picked question.
    pub async fn advance(&mut self) {
        let now = self.clock.now();
        self.pick_next(now);
        self.broadcast(&self.question_update());
        self.save().await;
    }

    /// Throw away all progress and start over.
    pub async fn reset(&mut self) {
        let now = self.clock.now();
        self.progress = self
            .store
            .reset(
                &self.quiz,
                self.settings.sync_progress,
                self.scheduler.initial_repetitions(),
            )
            .await;
        self.ticking = false;
        self.started_at = now;
        self.pick_next(now);
        info!(quiz_id = %self.quiz.id, "quiz progress reset");
        self.broadcast(&self.question_update());
        self.save().await;
    }

    /// Recompute study time from the baseline. No effect while paused.
    pub fn tick(&mut self) -> u64 {
        let now = self.clock.now();
        self.tick_at(now);
        self.progress.study_time_seconds
    }

    /// Turn continuity on or off and persist the choice.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Settings` if the settings service rejects the
    /// change. Session state is left untouched in that case.
    pub async fn set_sync_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        let updated = self
            .settings_source
            .patch_settings(&SettingsPatch::sync_progress(enabled))
            .await
            .map_err(SessionError::Settings)?;
        self.settings.sync_progress = updated.sync_progress;
        if self.settings.sync_progress {
            self.start_peer().await;
            self.save().await;
        } else {
            self.stop_peer();
        }
        Ok(())
    }

    /// Persist progress and leave the peer session.
    pub async fn close(&mut self) {
        self.save().await;
        self.stop_peer();
    }

    //
    // ─── CONTINUITY ────────────────────────────────────────────────────────────
    //

    /// True while the peer session holds a transport endpoint.
    #[must_use]
    pub fn is_peer_active(&self) -> bool {
        self.peer
            .as_ref()
            .is_some_and(|peer| peer.local_identity().is_some())
    }

    /// Next transport event. `None` immediately when no endpoint is held.
    pub async fn next_transport_event(&mut self) -> Option<TransportEvent> {
        match self.peer.as_mut() {
            Some(peer) => peer.next_event().await,
            None => None,
        }
    }

    /// Route one transport event through the peer session and apply what it
    /// delivers.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<PeerEvent> {
        let now = self.clock.now();
        self.tick_at(now);
        let snapshot = self.snapshot();
        let Some(peer) = self.peer.as_mut() else {
            return Vec::new();
        };
        let events = peer.handle(event, &snapshot, now).await;
        for event in &events {
            self.apply_peer_event(event).await;
        }
        events
    }

    /// Apply one peer event to local state.
    pub async fn apply_peer_event(&mut self, event: &PeerEvent) {
        let now = self.clock.now();
        match event {
            PeerEvent::Sync(delivery) => {
                if self.apply_delivery(delivery.clone(), now) {
                    self.save().await;
                }
            }
            PeerEvent::PeersChanged => {
                let peers = self.peer.as_ref().map_or(0, |peer| peer.peers().len());
                debug!(peers, "continuity peers changed");
            }
            PeerEvent::RoleChanged(role) => {
                info!(?role, "continuity role changed");
                if *role == Role::Host {
                    self.save().await;
                }
            }
        }
    }

    /// Probe peers, or retry joining after a failed role resolution. Call
    /// every heartbeat interval.
    pub async fn heartbeat(&mut self) {
        let now = self.clock.now();
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        let events = peer.rejoin_if_detached(now).await;
        peer.heartbeat_tick(now);
        for event in &events {
            self.apply_peer_event(event).await;
        }
    }

    /// Returns true if stored progress changed.
    fn apply_delivery(&mut self, delivery: Delivery, now: DateTime<Utc>) -> bool {
        match delivery {
            Delivery::InitialSync(sync) => {
                self.apply_initial_sync(sync, now);
                true
            }
            Delivery::QuestionUpdate(update) => self.apply_question_update(update, now),
            Delivery::AnswerChecked => {
                let verdict = self.check_answer(now);
                if verdict.is_none() {
                    debug!("ignoring answer_checked without an unchecked question");
                }
                verdict.is_some()
            }
        }
    }

    fn apply_initial_sync(&mut self, sync: InitialSync, now: DateTime<Utc>) {
        self.progress.correct_count = sync.correct_count;
        self.progress.wrong_count = sync.wrong_count;
        self.progress.reoccurrences = self.scheduler.reconcile(&self.quiz, &sync.reoccurrences);
        self.progress.study_time_seconds = elapsed_seconds(sync.start_time, now);
        self.started_at = sync.start_time;
    }

    fn apply_question_update(&mut self, update: QuestionUpdate, now: DateTime<Utc>) -> bool {
        let previous = self.progress.current_question_id;
        if let Some(question) = &update.question {
            if !self.quiz.contains(question.id) {
                debug!(question_id = %question.id, "peer question is not in the local quiz snapshot");
            }
        }
        self.show(update.question, update.selected_answers, now);
        previous != self.progress.current_question_id
    }

    async fn start_peer(&mut self) {
        if self.peer.is_some() || !self.settings.sync_progress {
            return;
        }
        let (Some(user_id), Some(continuity)) = (self.user_id, self.continuity.as_ref()) else {
            debug!("continuity needs a signed-in user and a transport");
            return;
        };
        let peer = PeerSession::start(
            Arc::clone(&continuity.transport),
            self.quiz.id,
            user_id,
            continuity.metadata.clone(),
            self.heartbeat,
            self.clock.now(),
        )
        .await;
        info!(quiz_id = %self.quiz.id, role = ?peer.role(), "continuity started");
        self.peer = Some(peer);
    }

    fn stop_peer(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            peer.shutdown();
        }
    }

    fn broadcast(&self, message: &SyncMessage) {
        if let Some(peer) = &self.peer {
            peer.send_to_all(message);
        }
    }

    fn question_update(&self) -> SyncMessage {
        SyncMessage::QuestionUpdate(QuestionUpdate {
            question: self.question.clone(),
            selected_answers: self.selected.clone(),
        })
    }

    //
    // ─── STATE TRANSITIONS ─────────────────────────────────────────────────────
    //

    /// Reconcile loaded counters and show the stored question if it still
    /// needs repetitions.
    fn resume(&mut self, now: DateTime<Utc>) {
        self.progress.reoccurrences = self
            .scheduler
            .reconcile(&self.quiz, &self.progress.reoccurrences);

        let stored = self
            .progress
            .current_question_id
            .filter(|id| {
                self.progress
                    .counter(*id)
                    .is_some_and(|counter| !counter.is_mastered())
            })
            .and_then(|id| self.quiz.question(id).cloned());

        match stored {
            Some(mut question) => {
                question.answers.shuffle(&mut self.rng);
                self.show(Some(question), Vec::new(), now);
            }
            None => self.pick_next(now),
        }
    }

    fn pick_next(&mut self, now: DateTime<Utc>) {
        let next = self
            .scheduler
            .pick_next(&self.quiz, &self.progress.reoccurrences, &mut self.rng)
            .into_question();
        if next.is_none() {
            info!(quiz_id = %self.quiz.id, "quiz finished");
        }
        self.show(next, Vec::new(), now);
    }

    fn show(&mut self, question: Option<Question>, selected: Vec<AnswerId>, now: DateTime<Utc>) {
        self.progress.current_question_id = question.as_ref().map(|question| question.id);
        self.question = question;
        self.selected = selected;
        self.checked = None;
        self.set_ticking(self.question.is_some(), now);
    }

    fn check_answer(&mut self, now: DateTime<Utc>) -> Option<Verdict> {
        if self.checked.is_some() {
            return None;
        }
        let question = self.question.as_ref()?;
        let verdict = score(question, &self.selected);
        self.progress.reoccurrences =
            self.scheduler
                .apply_result(&self.progress.reoccurrences, question.id, verdict);
        match verdict {
            Verdict::Correct => self.progress.correct_count += 1,
            Verdict::Incorrect => self.progress.wrong_count += 1,
        }
        self.progress.last_activity = Some(now);
        self.checked = Some(verdict);
        self.tick_at(now);
        Some(verdict)
    }

    fn baseline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if self.ticking {
            self.started_at
        } else {
            baseline_for(self.progress.study_time_seconds, now)
        }
    }

    fn tick_at(&mut self, now: DateTime<Utc>) {
        if self.ticking {
            self.progress.study_time_seconds = elapsed_seconds(self.started_at, now);
        }
    }

    /// Pause keeps the accumulated time; resume continues from it.
    fn set_ticking(&mut self, ticking: bool, now: DateTime<Utc>) {
        if ticking == self.ticking {
            return;
        }
        if ticking {
            self.started_at = baseline_for(self.progress.study_time_seconds, now);
        } else {
            self.tick_at(now);
        }
        self.ticking = ticking;
    }

    async fn save(&mut self) {
        self.tick_at(self.clock.now());
        self.store
            .save(
                self.quiz.id,
                &self.progress,
                self.settings.sync_progress,
                self.is_authoritative_writer(),
            )
            .await;
    }
}
