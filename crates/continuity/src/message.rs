use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quiz_core::model::{AnswerId, Question, ReoccurrenceCounter};

/// Coarse device category shown next to connected peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Laptop,
    Tablet,
    Phone,
    #[default]
    Unknown,
}

impl DeviceClass {
    /// Parse a loose device label, falling back to `Unknown`.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "desktop" => Self::Desktop,
            "laptop" => Self::Laptop,
            "tablet" => Self::Tablet,
            "phone" | "mobile" => Self::Phone,
            _ => Self::Unknown,
        }
    }
}

/// Metadata a client attaches to its connection handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub device_name: String,
    pub device_class: DeviceClass,
}

impl PeerMetadata {
    #[must_use]
    pub fn new(device_name: impl Into<String>, device_class: DeviceClass) -> Self {
        Self {
            device_name: device_name.into(),
            device_class,
        }
    }
}

/// Full counter state and timer baseline the host pushes to a newcomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialSync {
    pub start_time: DateTime<Utc>,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub reoccurrences: Vec<ReoccurrenceCounter>,
}

/// Replacement of the current question and answer selection.
///
/// `question` is `None` once the sender has finished the quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionUpdate {
    pub question: Option<Question>,
    pub selected_answers: Vec<AnswerId>,
}

/// Messages exchanged between peers.
///
/// Encoded as JSON objects tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    InitialSync(InitialSync),
    QuestionUpdate(QuestionUpdate),
    /// Receiver scores its own held question and selection.
    AnswerChecked,
    Ping,
    Pong,
}

impl SyncMessage {
    /// # Errors
    ///
    /// Returns the serializer error if the message cannot be encoded.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// # Errors
    ///
    /// Returns the parser error for malformed or unknown payloads.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::InitialSync(_) => "initial_sync",
            SyncMessage::QuestionUpdate(_) => "question_update",
            SyncMessage::AnswerChecked => "answer_checked",
            SyncMessage::Ping => "ping",
            SyncMessage::Pong => "pong",
        }
    }
}
