use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quiz_core::model::{QuizId, UserId};

const HOST_PREFIX: &str = "quiz-continuity";

/// Name under which an endpoint registers with the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Non-deterministic identity used by clients.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic identity shared by every device of `user_id` studying `quiz_id`.
///
/// Whichever device registers it first is the host.
#[must_use]
pub fn host_identity(quiz_id: QuizId, user_id: UserId) -> PeerIdentity {
    PeerIdentity(format!("{HOST_PREFIX}-{quiz_id}-{user_id}"))
}
