use std::env;

use continuity::{DeviceClass, PeerMetadata};

/// Where the quiz, settings and progress services live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token of the signed-in user. `None` means anonymous.
    pub token: Option<String>,
}

impl ApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Reads `QUIZ_API_BASE_URL` and `QUIZ_API_TOKEN`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("QUIZ_API_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self::new(base_url, env::var("QUIZ_API_TOKEN").ok()))
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

/// How this device introduces itself to peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device_name: String,
    pub device_class: DeviceClass,
}

impl DeviceConfig {
    /// Reads `QUIZ_DEVICE_NAME` and `QUIZ_DEVICE_CLASS`.
    #[must_use]
    pub fn from_env() -> Self {
        let device_name = env::var("QUIZ_DEVICE_NAME")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Unnamed device".into());
        let device_class = env::var("QUIZ_DEVICE_CLASS")
            .map(|label| DeviceClass::from_label(&label))
            .unwrap_or_default();
        Self {
            device_name,
            device_class,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> PeerMetadata {
        PeerMetadata::new(self.device_name.clone(), self.device_class)
    }
}
