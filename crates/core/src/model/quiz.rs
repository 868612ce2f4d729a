use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ids::{AnswerId, QuestionId, QuizId};

/// A single answer option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
    pub correct: bool,
}

impl Answer {
    #[must_use]
    pub fn new(id: AnswerId, text: impl Into<String>, correct: bool) -> Self {
        Self {
            id,
            text: text.into(),
            correct,
        }
    }
}

/// A quiz question with its answer options.
///
/// Every question carries at least one correct answer; the quiz editor
/// enforces this before a quiz reaches a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    #[serde(default)]
    pub multiple_choice: bool,
    pub answers: Vec<Answer>,
}

impl Question {
    #[must_use]
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        multiple_choice: bool,
        answers: Vec<Answer>,
    ) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            multiple_choice,
            answers,
        }
    }

    /// Ids of all answers flagged correct.
    #[must_use]
    pub fn correct_answer_ids(&self) -> BTreeSet<AnswerId> {
        self.answers
            .iter()
            .filter(|answer| answer.correct)
            .map(|answer| answer.id)
            .collect()
    }

    #[must_use]
    pub fn answer(&self, id: AnswerId) -> Option<&Answer> {
        self.answers.iter().find(|answer| answer.id == id)
    }
}

/// Read-only snapshot of a quiz definition held for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub title: String,
    #[serde(default)]
    pub version: u64,
    pub questions: Vec<Question>,
}

impl Quiz {
    #[must_use]
    pub fn new(id: QuizId, title: impl Into<String>, version: u64, questions: Vec<Question>) -> Self {
        Self {
            id,
            title: title.into(),
            version,
            questions,
        }
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: QuestionId) -> bool {
        self.question(id).is_some()
    }
}
