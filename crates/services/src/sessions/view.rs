use continuity::{ConnectionId, DeviceClass, PeerSummary, Role};
use quiz_core::model::{AnswerId, Question, QuizId};
use quiz_core::Verdict;

/// One connected device as the UI lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerView {
    pub connection: ConnectionId,
    /// Unknown for the host link; the host never sends its metadata.
    pub device_name: Option<String>,
    pub device_class: DeviceClass,
    pub is_host: bool,
}

impl PeerView {
    #[must_use]
    pub fn from_summary(summary: PeerSummary) -> Self {
        let (device_name, device_class) = match summary.metadata {
            Some(metadata) => (Some(metadata.device_name), metadata.device_class),
            None => (None, DeviceClass::Unknown),
        };
        Self {
            connection: summary.connection,
            device_name,
            device_class,
            is_host: summary.is_host,
        }
    }
}

/// Presentation-agnostic snapshot of a quiz session.
///
/// No pre-formatted strings; the UI formats study time and counts itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub quiz_id: QuizId,
    pub quiz_title: String,

    /// Current question with answers in display order. `None` once finished.
    pub question: Option<Question>,
    pub selected_answers: Vec<AnswerId>,
    /// Verdict of the last check of the current question, if checked.
    pub checked: Option<Verdict>,
    pub is_finished: bool,

    pub correct_count: u32,
    pub wrong_count: u32,
    pub mastered_count: usize,
    pub total_questions: usize,
    pub study_time_seconds: u64,

    pub sync_enabled: bool,
    /// `None` while continuity is off.
    pub role: Option<Role>,
    pub peers: Vec<PeerView>,
}

impl SessionView {
    /// True if `answer` is part of the current selection.
    #[must_use]
    pub fn is_selected(&self, answer: AnswerId) -> bool {
        self.selected_answers.contains(&answer)
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.role == Some(Role::Host)
    }
}
