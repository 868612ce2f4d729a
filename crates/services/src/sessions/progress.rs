use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use quiz_core::model::{Progress, Quiz, QuizId};
use quiz_core::scheduler::reconcile;
use quiz_core::time::baseline_for;
use storage::KeyValueStore;

use crate::api::ProgressRemote;

/// Local storage key for the progress of `quiz_id`.
#[must_use]
pub fn storage_key(quiz_id: QuizId) -> String {
    format!("quiz-progress-{quiz_id}")
}

/// Where loaded progress came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSource {
    Remote,
    Local,
}

/// Stored progress plus the wall-clock baseline its study time implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedProgress {
    pub progress: Progress,
    /// `now - study_time_seconds` at load time.
    pub started_at: DateTime<Utc>,
    pub source: ProgressSource,
}

/// Local-first progress persistence with an optional remote mirror.
///
/// No operation fails outward: remote problems degrade to local-only and
/// local problems are logged.
#[derive(Clone)]
pub struct ProgressStore {
    local: Arc<dyn KeyValueStore>,
    remote: Option<Arc<dyn ProgressRemote>>,
}

impl ProgressStore {
    #[must_use]
    pub fn new(local: Arc<dyn KeyValueStore>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    /// Attach the signed-in user's remote progress store.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn ProgressRemote>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.remote.is_some()
    }

    fn synced_remote(&self, sync_enabled: bool) -> Option<&Arc<dyn ProgressRemote>> {
        self.remote.as_ref().filter(|_| sync_enabled)
    }

    /// Load progress, preferring the remote copy when sync is on.
    ///
    /// A reachable remote wins outright; any remote failure falls back to
    /// the local entry.
    pub async fn load(
        &self,
        quiz_id: QuizId,
        sync_enabled: bool,
        now: DateTime<Utc>,
    ) -> Option<LoadedProgress> {
        if let Some(remote) = self.synced_remote(sync_enabled) {
            match remote.fetch_progress(quiz_id).await {
                Ok(progress) => return Some(Self::loaded(progress, ProgressSource::Remote, now)),
                Err(err) => debug!(%quiz_id, error = %err, "remote progress unavailable, using local"),
            }
        }

        let key = storage_key(quiz_id);
        let raw = match self.local.get(&key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(%key, error = %err, "failed to read local progress");
                return None;
            }
        };
        match serde_json::from_str::<Progress>(&raw) {
            Ok(progress) => Some(Self::loaded(progress, ProgressSource::Local, now)),
            Err(err) => {
                warn!(%key, error = %err, "discarding unreadable local progress");
                None
            }
        }
    }

    fn loaded(progress: Progress, source: ProgressSource, now: DateTime<Utc>) -> LoadedProgress {
        LoadedProgress {
            started_at: baseline_for(progress.study_time_seconds, now),
            progress,
            source,
        }
    }

    /// Persist locally, then remotely if sync is on and this device is the
    /// authoritative writer.
    pub async fn save(
        &self,
        quiz_id: QuizId,
        progress: &Progress,
        sync_enabled: bool,
        is_authoritative_writer: bool,
    ) {
        let key = storage_key(quiz_id);
        match serde_json::to_string(progress) {
            Ok(raw) => {
                if let Err(err) = self.local.set(&key, &raw).await {
                    warn!(%key, error = %err, "failed to write local progress");
                }
            }
            Err(err) => warn!(%key, error = %err, "failed to encode progress"),
        }

        let Some(remote) = self.synced_remote(sync_enabled) else {
            return;
        };
        if !is_authoritative_writer {
            debug!(%quiz_id, "skipping remote save on non-authoritative device");
            return;
        }
        if let Err(err) = remote.save_progress(quiz_id, progress).await {
            warn!(%quiz_id, error = %err, "remote progress save failed");
        }
    }

    /// Forget stored progress and return fresh progress for `quiz`.
    pub async fn reset(&self, quiz: &Quiz, sync_enabled: bool, default_repetitions: u32) -> Progress {
        let key = storage_key(quiz.id);
        if let Err(err) = self.local.remove(&key).await {
            warn!(%key, error = %err, "failed to remove local progress");
        }
        if let Some(remote) = self.synced_remote(sync_enabled) {
            if let Err(err) = remote.delete_progress(quiz.id).await {
                warn!(quiz_id = %quiz.id, error = %err, "remote progress delete failed");
            }
        }
        Progress::fresh(reconcile(quiz, &[], default_repetitions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryApi;
    use chrono::Duration;
    use quiz_core::model::{QuestionId, ReoccurrenceCounter};
    use quiz_core::time::fixed_now;
    use storage::InMemoryStore;

    fn progress(study_time_seconds: u64) -> Progress {
        Progress {
            current_question_id: Some(QuestionId::new(2)),
            correct_count: 4,
            wrong_count: 1,
            study_time_seconds,
            reoccurrences: vec![
                ReoccurrenceCounter::new(QuestionId::new(1), 0),
                ReoccurrenceCounter::new(QuestionId::new(2), 2),
            ],
            last_activity: Some(fixed_now()),
        }
    }

    fn stores() -> (ProgressStore, InMemoryStore, InMemoryApi) {
        let local = InMemoryStore::new();
        let api = InMemoryApi::new();
        let store = ProgressStore::new(Arc::new(local.clone())).with_remote(Arc::new(api.clone()));
        (store, local, api)
    }

    #[tokio::test]
    async fn save_then_load_round_trips_locally() {
        let (store, _local, api) = stores();
        let quiz_id = QuizId::new(3);
        store.save(quiz_id, &progress(120), false, true).await;
        assert_eq!(api.progress_writes(), 0);

        let later = fixed_now() + Duration::seconds(30);
        let loaded = store.load(quiz_id, false, later).await.unwrap();
        assert_eq!(loaded.source, ProgressSource::Local);
        assert_eq!(loaded.progress, progress(120));
        assert_eq!(loaded.started_at, later - Duration::seconds(120));
    }

    #[tokio::test]
    async fn remote_wins_when_reachable() {
        let (store, _local, api) = stores();
        let quiz_id = QuizId::new(3);
        store.save(quiz_id, &progress(10), false, true).await;
        api.seed_progress(quiz_id, progress(99));

        let loaded = store.load(quiz_id, true, fixed_now()).await.unwrap();
        assert_eq!(loaded.source, ProgressSource::Remote);
        assert_eq!(loaded.progress.study_time_seconds, 99);
    }

    #[tokio::test]
    async fn falls_back_to_local_when_remote_fails() {
        let (store, _local, api) = stores();
        let quiz_id = QuizId::new(3);
        store.save(quiz_id, &progress(10), false, true).await;
        api.set_offline(true);

        let loaded = store.load(quiz_id, true, fixed_now()).await.unwrap();
        assert_eq!(loaded.source, ProgressSource::Local);
        assert_eq!(loaded.progress.study_time_seconds, 10);
    }

    #[tokio::test]
    async fn remote_writes_respect_the_writer_gate() {
        let (store, local, api) = stores();
        let quiz_id = QuizId::new(3);

        store.save(quiz_id, &progress(1), true, false).await;
        assert_eq!(api.progress_writes(), 0);
        assert_eq!(local.len(), 1);

        store.save(quiz_id, &progress(2), true, true).await;
        assert_eq!(api.progress_writes(), 1);
        assert_eq!(api.stored_progress(quiz_id), Some(progress(2)));
    }

    #[tokio::test]
    async fn remote_failures_are_swallowed() {
        let (store, local, api) = stores();
        api.set_offline(true);
        store.save(QuizId::new(3), &progress(1), true, true).await;
        assert_eq!(local.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_store_never_touches_remote() {
        let local = InMemoryStore::new();
        let store = ProgressStore::new(Arc::new(local.clone()));
        assert!(!store.is_authenticated());
        store.save(QuizId::new(1), &progress(5), true, true).await;
        assert!(store.load(QuizId::new(1), true, fixed_now()).await.is_some());
    }

    #[tokio::test]
    async fn corrupt_local_entry_loads_as_missing() {
        let local = InMemoryStore::new();
        local.set(&storage_key(QuizId::new(1)), "{oops").await.unwrap();
        let store = ProgressStore::new(Arc::new(local));
        assert!(store.load(QuizId::new(1), false, fixed_now()).await.is_none());
    }

    #[tokio::test]
    async fn reset_clears_both_stores() {
        use quiz_core::model::{Answer, AnswerId, Question};

        let (store, local, api) = stores();
        let quiz = Quiz::new(
            QuizId::new(3),
            "Reset",
            1,
            vec![Question::new(
                QuestionId::new(1),
                "?",
                false,
                vec![Answer::new(AnswerId::new(1), "a", true)],
            )],
        );
        store.save(quiz.id, &progress(7), true, true).await;

        let fresh = store.reset(&quiz, true, 3).await;
        assert!(local.is_empty());
        assert!(api.stored_progress(quiz.id).is_none());
        assert_eq!(
            fresh.reoccurrences,
            vec![ReoccurrenceCounter::new(QuestionId::new(1), 3)]
        );
        assert_eq!(fresh.correct_count, 0);
    }
}
