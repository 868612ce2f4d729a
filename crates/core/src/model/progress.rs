use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::QuestionId;

/// Remaining correct answers required before a question counts as mastered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReoccurrenceCounter {
    pub question_id: QuestionId,
    pub remaining_repetitions: u32,
}

impl ReoccurrenceCounter {
    #[must_use]
    pub fn new(question_id: QuestionId, remaining_repetitions: u32) -> Self {
        Self {
            question_id,
            remaining_repetitions,
        }
    }

    #[must_use]
    pub fn is_mastered(&self) -> bool {
        self.remaining_repetitions == 0
    }
}

/// Canonical study progress for one quiz.
///
/// Persisted locally on every question transition and mirrored to the
/// remote store when this device is the authoritative writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_question_id: Option<QuestionId>,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub study_time_seconds: u64,
    pub reoccurrences: Vec<ReoccurrenceCounter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl Progress {
    /// Progress with zeroed counts and the given counters.
    #[must_use]
    pub fn fresh(reoccurrences: Vec<ReoccurrenceCounter>) -> Self {
        Self {
            current_question_id: None,
            correct_count: 0,
            wrong_count: 0,
            study_time_seconds: 0,
            reoccurrences,
            last_activity: None,
        }
    }

    #[must_use]
    pub fn counter(&self, question_id: QuestionId) -> Option<&ReoccurrenceCounter> {
        self.reoccurrences
            .iter()
            .find(|counter| counter.question_id == question_id)
    }

    /// True when every counter is zero or no counters exist.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.reoccurrences.iter().all(ReoccurrenceCounter::is_mastered)
    }

    #[must_use]
    pub fn mastered_count(&self) -> usize {
        self.reoccurrences
            .iter()
            .filter(|counter| counter.is_mastered())
            .count()
    }
}
