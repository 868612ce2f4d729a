#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod http_api;
pub mod sessions;

pub use quiz_core::Clock;

pub use api::{InMemoryApi, ProgressRemote, QuizSource, SettingsSource};
pub use config::{ApiConfig, DeviceConfig};
pub use error::{ApiError, SessionError};
pub use http_api::HttpApi;
pub use sessions::{
    LoadedProgress, PeerView, ProgressSource, ProgressStore, QuizSession, QuizSessionService,
    SessionCommand, SessionDriver, SessionHandle, SessionView,
};
