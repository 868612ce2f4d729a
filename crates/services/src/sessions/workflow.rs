use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use quiz_core::model::AnswerId;

use super::service::QuizSession;
use super::view::SessionView;

/// Study time is recomputed on this cadence.
const STUDY_TICK: Duration = Duration::from_secs(1);

/// UI requests accepted by a running `SessionDriver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Select(Vec<AnswerId>),
    Submit(Vec<AnswerId>),
    Advance,
    Reset,
    SetSync(bool),
    Close,
}

/// UI side of a running session: send commands, watch views.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    views: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Returns false once the driver has stopped.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    #[must_use]
    pub fn view(&self) -> SessionView {
        self.views.borrow().clone()
    }

    /// Wait for the next published view. `None` once the driver stopped.
    pub async fn changed(&mut self) -> Option<SessionView> {
        self.views.changed().await.ok()?;
        Some(self.views.borrow_and_update().clone())
    }
}

/// Owns a `QuizSession` and drives its timers, commands and peer traffic
/// from a single task.
pub struct SessionDriver {
    session: QuizSession,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    views: watch::Sender<SessionView>,
}

impl SessionDriver {
    #[must_use]
    pub fn new(session: QuizSession) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(session.view());
        let driver = Self {
            session,
            commands: command_rx,
            views: view_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            views: view_rx,
        };
        (driver, handle)
    }

    /// Run until `SessionCommand::Close` or until every handle is dropped.
    ///
    /// Returns the closed session.
    pub async fn run(mut self) -> QuizSession {
        let mut study_tick = tokio::time::interval(STUDY_TICK);
        study_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = tokio::time::interval(self.session.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = study_tick.tick() => {
                    self.session.tick();
                }
                _ = heartbeat.tick() => self.session.heartbeat().await,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Close) | None => break,
                    Some(command) => self.apply(command).await,
                },
                Some(event) = self.session.next_transport_event(), if self.session.is_peer_active() => {
                    self.session.handle_transport_event(event).await;
                }
            }
            self.publish();
        }

        self.session.close().await;
        self.publish();
        debug!(quiz_id = %self.session.quiz().id, "session driver stopped");
        self.session
    }

    async fn apply(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Select(answers) => {
                self.session.select_answers(answers);
            }
            SessionCommand::Submit(answers) => {
                self.session.submit_answer(answers).await;
            }
            SessionCommand::Advance => self.session.advance().await,
            SessionCommand::Reset => self.session.reset().await,
            SessionCommand::SetSync(enabled) => {
                if let Err(err) = self.session.set_sync_enabled(enabled).await {
                    warn!(error = %err, enabled, "could not change continuity setting");
                }
            }
            SessionCommand::Close => {}
        }
    }

    fn publish(&self) {
        let view = self.session.view();
        self.views.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
