//! External collaborators of a quiz session.
//!
//! The quiz service, the settings service and the remote progress store are
//! separate traits so a deployment can mix sources. `InMemoryApi` implements
//! all three for tests and offline runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use quiz_core::model::{Progress, Quiz, QuizId, SessionSettings, SettingsPatch};

use crate::error::ApiError;

#[async_trait]
pub trait QuizSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `ApiError::NotFound` if no quiz has this id, or another
    /// `ApiError` if the service cannot be reached.
    async fn fetch_quiz(&self, id: QuizId) -> Result<Quiz, ApiError>;
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// # Errors
    ///
    /// Returns `ApiError` if the settings cannot be fetched.
    async fn fetch_settings(&self) -> Result<SessionSettings, ApiError>;

    /// Apply `patch` and return the resulting settings.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` if the update is rejected or fails.
    async fn patch_settings(&self, patch: &SettingsPatch) -> Result<SessionSettings, ApiError>;
}

/// Per-user remote progress. Only constructed for authenticated users.
#[async_trait]
pub trait ProgressRemote: Send + Sync {
    /// # Errors
    ///
    /// Returns `ApiError::NotFound` when nothing is stored for `quiz_id`.
    async fn fetch_progress(&self, quiz_id: QuizId) -> Result<Progress, ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError` if the write fails.
    async fn save_progress(&self, quiz_id: QuizId, progress: &Progress) -> Result<(), ApiError>;

    /// # Errors
    ///
    /// Returns `ApiError` if the delete fails.
    async fn delete_progress(&self, quiz_id: QuizId) -> Result<(), ApiError>;
}

#[derive(Debug, Default)]
struct ApiState {
    quizzes: HashMap<QuizId, Quiz>,
    settings: SessionSettings,
    progress: HashMap<QuizId, Progress>,
    offline: bool,
    progress_writes: usize,
}

/// In-memory collaborator set. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryApi {
    state: Arc<Mutex<ApiState>>,
}

impl InMemoryApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quiz(self, quiz: Quiz) -> Self {
        self.insert_quiz(quiz);
        self
    }

    #[must_use]
    pub fn with_settings(self, settings: SessionSettings) -> Self {
        if let Ok(mut state) = self.state() {
            state.settings = settings;
        }
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, ApiState>, ApiError> {
        self.state
            .lock()
            .map_err(|e| ApiError::Unavailable(e.to_string()))
    }

    /// Insert or replace a quiz, e.g. to simulate an edit between sessions.
    pub fn insert_quiz(&self, quiz: Quiz) {
        if let Ok(mut state) = self.state() {
            state.quizzes.insert(quiz.id, quiz);
        }
    }

    /// While offline every call fails with `ApiError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state() {
            state.offline = offline;
        }
    }

    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        self.state().map(|state| state.settings).unwrap_or_default()
    }

    #[must_use]
    pub fn stored_progress(&self, quiz_id: QuizId) -> Option<Progress> {
        self.state()
            .ok()
            .and_then(|state| state.progress.get(&quiz_id).cloned())
    }

    /// Store progress directly, bypassing the write counter.
    pub fn seed_progress(&self, quiz_id: QuizId, progress: Progress) {
        if let Ok(mut state) = self.state() {
            state.progress.insert(quiz_id, progress);
        }
    }

    /// Number of successful remote progress writes so far.
    #[must_use]
    pub fn progress_writes(&self) -> usize {
        self.state().map(|state| state.progress_writes).unwrap_or(0)
    }

    fn online(&self) -> Result<MutexGuard<'_, ApiState>, ApiError> {
        let state = self.state()?;
        if state.offline {
            return Err(ApiError::Unavailable("offline".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl QuizSource for InMemoryApi {
    async fn fetch_quiz(&self, id: QuizId) -> Result<Quiz, ApiError> {
        self.online()?
            .quizzes
            .get(&id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }
}

#[async_trait]
impl SettingsSource for InMemoryApi {
    async fn fetch_settings(&self) -> Result<SessionSettings, ApiError> {
        Ok(self.online()?.settings)
    }

    async fn patch_settings(&self, patch: &SettingsPatch) -> Result<SessionSettings, ApiError> {
        let mut state = self.online()?;
        state.settings = patch.apply(state.settings);
        Ok(state.settings)
    }
}

#[async_trait]
impl ProgressRemote for InMemoryApi {
    async fn fetch_progress(&self, quiz_id: QuizId) -> Result<Progress, ApiError> {
        self.online()?
            .progress
            .get(&quiz_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn save_progress(&self, quiz_id: QuizId, progress: &Progress) -> Result<(), ApiError> {
        let mut state = self.online()?;
        state.progress.insert(quiz_id, progress.clone());
        state.progress_writes += 1;
        Ok(())
    }

    async fn delete_progress(&self, quiz_id: QuizId) -> Result<(), ApiError> {
        self.online()?.progress.remove(&quiz_id);
        Ok(())
    }
}
