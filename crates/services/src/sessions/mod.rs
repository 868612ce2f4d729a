mod progress;
mod service;
mod view;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use progress::{LoadedProgress, ProgressSource, ProgressStore, storage_key};
pub use service::{QuizSession, QuizSessionService};
pub use view::{PeerView, SessionView};
pub use workflow::{SessionCommand, SessionDriver, SessionHandle};
