//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::QuizId;

/// Failures talking to the quiz, settings or progress services.
///
/// Always recoverable for the session: callers fall back to local state or
/// skip the write.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    #[error("request requires an authenticated user")]
    Unauthenticated,
    #[error("request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The only fatal condition: there is no quiz to study.
    #[error("quiz {quiz_id} is unavailable")]
    QuizUnavailable {
        quiz_id: QuizId,
        #[source]
        source: ApiError,
    },
    #[error("settings update failed")]
    Settings(#[source] ApiError),
}
