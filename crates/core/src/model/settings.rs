use serde::{Deserialize, Serialize};

/// User settings the session engine reads from the settings service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Continuity: sync progress remotely and live across devices.
    pub sync_progress: bool,
    pub initial_repetitions: u32,
    pub wrong_answer_repetitions: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            sync_progress: false,
            initial_repetitions: 1,
            wrong_answer_repetitions: 1,
        }
    }
}

/// Partial settings update. Absent fields are left unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_repetitions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrong_answer_repetitions: Option<u32>,
}

impl SettingsPatch {
    #[must_use]
    pub fn sync_progress(enabled: bool) -> Self {
        Self {
            sync_progress: Some(enabled),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn apply(&self, settings: SessionSettings) -> SessionSettings {
        SessionSettings {
            sync_progress: self.sync_progress.unwrap_or(settings.sync_progress),
            initial_repetitions: self.initial_repetitions.unwrap_or(settings.initial_repetitions),
            wrong_answer_repetitions: self
                .wrong_answer_repetitions
                .unwrap_or(settings.wrong_answer_repetitions),
        }
    }
}
