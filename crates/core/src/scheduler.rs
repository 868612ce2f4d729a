use std::collections::{BTreeSet, HashSet};

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use thiserror::Error;

use crate::model::{AnswerId, Question, QuestionId, Quiz, ReoccurrenceCounter};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("initial repetitions must be at least 1, got {provided}")]
    InvalidInitialRepetitions { provided: u32 },
}

//
// ─── OUTCOMES ──────────────────────────────────────────────────────────────────
//

/// Result of asking the scheduler for the next question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextQuestion {
    /// A question whose answers have been freshly shuffled.
    Question(Question),
    /// No question has remaining repetitions.
    Finished,
}

impl NextQuestion {
    #[must_use]
    pub fn into_question(self) -> Option<Question> {
        match self {
            NextQuestion::Question(question) => Some(question),
            NextQuestion::Finished => None,
        }
    }
}

/// Verdict of checking a selection against a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    #[must_use]
    pub fn is_correct(self) -> bool {
        matches!(self, Verdict::Correct)
    }
}

//
// ─── PURE OPERATIONS ───────────────────────────────────────────────────────────
//

/// Pick a question uniformly among those with remaining repetitions.
///
/// Counters referring to questions absent from `quiz` are ignored. The
/// returned question's answers are shuffled with `rng` on every call.
pub fn pick_next<R: Rng + ?Sized>(
    quiz: &Quiz,
    counters: &[ReoccurrenceCounter],
    rng: &mut R,
) -> NextQuestion {
    let candidates: Vec<QuestionId> = counters
        .iter()
        .filter(|counter| counter.remaining_repetitions > 0 && quiz.contains(counter.question_id))
        .map(|counter| counter.question_id)
        .collect();

    let Some(chosen) = candidates.choose(rng).copied() else {
        return NextQuestion::Finished;
    };

    let Some(question) = resolve(quiz, counters, chosen) else {
        return NextQuestion::Finished;
    };

    let mut shown = question.clone();
    shown.answers.shuffle(rng);
    NextQuestion::Question(shown)
}

/// Look up `chosen`, or any question with a positive counter if the counter
/// set and the quiz disagree.
fn resolve<'q>(
    quiz: &'q Quiz,
    counters: &[ReoccurrenceCounter],
    chosen: QuestionId,
) -> Option<&'q Question> {
    quiz.question(chosen).or_else(|| {
        quiz.questions.iter().find(|question| {
            counters.iter().any(|counter| {
                counter.question_id == question.id && counter.remaining_repetitions > 0
            })
        })
    })
}

/// A selection is correct iff it equals the set of correct answer ids.
#[must_use]
pub fn score(question: &Question, selected: &[AnswerId]) -> Verdict {
    let selected: BTreeSet<AnswerId> = selected.iter().copied().collect();
    if selected == question.correct_answer_ids() {
        Verdict::Correct
    } else {
        Verdict::Incorrect
    }
}

/// Apply a verdict to the counter of `question_id`.
///
/// Correct answers decrement (floored at zero); incorrect answers add
/// `wrong_increment`. Other counters are returned untouched.
#[must_use]
pub fn apply_result(
    counters: &[ReoccurrenceCounter],
    question_id: QuestionId,
    verdict: Verdict,
    wrong_increment: u32,
) -> Vec<ReoccurrenceCounter> {
    counters
        .iter()
        .map(|counter| {
            if counter.question_id != question_id {
                return *counter;
            }
            let remaining_repetitions = match verdict {
                Verdict::Correct => counter.remaining_repetitions.saturating_sub(1),
                Verdict::Incorrect => counter.remaining_repetitions.saturating_add(wrong_increment),
            };
            ReoccurrenceCounter::new(counter.question_id, remaining_repetitions)
        })
        .collect()
}

/// Align a counter set with the current quiz definition.
///
/// Drops counters for removed (or duplicated) questions and appends a fresh
/// counter for every question the set does not know yet. Idempotent.
#[must_use]
pub fn reconcile(
    quiz: &Quiz,
    counters: &[ReoccurrenceCounter],
    default_repetitions: u32,
) -> Vec<ReoccurrenceCounter> {
    let mut seen = HashSet::with_capacity(counters.len());
    let mut reconciled: Vec<ReoccurrenceCounter> = counters
        .iter()
        .filter(|counter| quiz.contains(counter.question_id) && seen.insert(counter.question_id))
        .copied()
        .collect();

    for question in &quiz.questions {
        if seen.insert(question.id) {
            reconciled.push(ReoccurrenceCounter::new(question.id, default_repetitions));
        }
    }

    reconciled
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Reoccurrence-counter scheduler bound to a user's repetition settings.
///
/// # Examples
///
/// ```
/// # use quiz_core::Scheduler;
/// let scheduler = Scheduler::try_new(2, 1)?;
/// assert_eq!(scheduler.initial_repetitions(), 2);
/// # Ok::<(), quiz_core::SchedulerError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    initial_repetitions: u32,
    wrong_answer_repetitions: u32,
}

impl Scheduler {
    /// # Errors
    ///
    /// Returns `InvalidInitialRepetitions` if `initial_repetitions` is zero.
    pub fn try_new(
        initial_repetitions: u32,
        wrong_answer_repetitions: u32,
    ) -> Result<Self, SchedulerError> {
        if initial_repetitions == 0 {
            return Err(SchedulerError::InvalidInitialRepetitions {
                provided: initial_repetitions,
            });
        }
        Ok(Self {
            initial_repetitions,
            wrong_answer_repetitions,
        })
    }

    #[must_use]
    pub fn initial_repetitions(&self) -> u32 {
        self.initial_repetitions
    }

    #[must_use]
    pub fn wrong_answer_repetitions(&self) -> u32 {
        self.wrong_answer_repetitions
    }

    #[must_use]
    pub fn with_wrong_answer_repetitions(mut self, wrong_answer_repetitions: u32) -> Self {
        self.wrong_answer_repetitions = wrong_answer_repetitions;
        self
    }

    pub fn pick_next<R: Rng + ?Sized>(
        &self,
        quiz: &Quiz,
        counters: &[ReoccurrenceCounter],
        rng: &mut R,
    ) -> NextQuestion {
        pick_next(quiz, counters, rng)
    }

    #[must_use]
    pub fn apply_result(
        &self,
        counters: &[ReoccurrenceCounter],
        question_id: QuestionId,
        verdict: Verdict,
    ) -> Vec<ReoccurrenceCounter> {
        apply_result(counters, question_id, verdict, self.wrong_answer_repetitions)
    }

    #[must_use]
    pub fn reconcile(&self, quiz: &Quiz, counters: &[ReoccurrenceCounter]) -> Vec<ReoccurrenceCounter> {
        reconcile(quiz, counters, self.initial_repetitions)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            initial_repetitions: 1,
            wrong_answer_repetitions: 1,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
