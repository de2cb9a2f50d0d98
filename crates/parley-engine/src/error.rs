//! Error types for parley-engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using parley-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the API layer
    #[error(transparent)]
    Api(#[from] parley_api::Error),

    /// A reply is still streaming in the active session
    #[error("An exchange is already in flight")]
    Busy,

    /// No message with this id in the timeline
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The message has no user query to re-submit
    #[error("Message cannot be retried: {0}")]
    NotRetryable(String),

    /// The session is not in the directory
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Rejected before reaching the server
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Why an exchange ended in an error bubble.
///
/// Every variant is shown as an assistant message with `is_error` set and can
/// be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExchangeFailure {
    /// Network or HTTP failure
    Transport(String),
    /// No bytes for longer than the idle timeout
    Timeout,
    /// The reply finished without any content
    EmptyResponse,
    /// The server refused the request in its response envelope
    Rejected(String),
}

impl ExchangeFailure {
    /// Classify an API error
    pub fn from_api(error: &parley_api::Error) -> Self {
        match error {
            parley_api::Error::Timeout(_) => ExchangeFailure::Timeout,
            parley_api::Error::Rejected { detail, .. } => ExchangeFailure::Rejected(detail.clone()),
            other => ExchangeFailure::Transport(other.to_string()),
        }
    }

    /// Text shown in place of the reply
    pub fn user_message(&self) -> &'static str {
        match self {
            ExchangeFailure::Transport(_) => "Error: Failed to get response from server.",
            ExchangeFailure::Timeout => "Error: The server stopped responding.",
            ExchangeFailure::EmptyResponse => "Error: The server returned an empty response.",
            ExchangeFailure::Rejected(_) => "Error: The server rejected the request.",
        }
    }
}

impl std::fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeFailure::Transport(detail) => write!(f, "transport error: {}", detail),
            ExchangeFailure::Timeout => f.write_str("stream timed out"),
            ExchangeFailure::EmptyResponse => f.write_str("empty response"),
            ExchangeFailure::Rejected(detail) => write!(f, "rejected: {}", detail),
        }
    }
}
