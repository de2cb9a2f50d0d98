//! Error types for parley-api

use std::time::Duration;
use thiserror::Error;

/// Result type alias using parley-api Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the session or completion endpoints
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    /// Server answered 200 but flagged the request as failed in its envelope
    #[error("Request rejected (code {code}): {detail}")]
    Rejected { code: i64, detail: String },

    /// A stream record could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response within the allowed time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a status error
    pub fn status(status: u16, detail: impl Into<String>) -> Self {
        Self::Status {
            status,
            detail: detail.into(),
        }
    }

    /// Whether the failure happened on the way to or from the server, as
    /// opposed to a malformed payload or a local misconfiguration.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Status { .. } | Error::Timeout(_)
        )
    }

    /// Check if repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Timeout(_) => true,
            Error::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_5xx_is_retryable() {
        assert!(Error::status(502, "bad gateway").is_retryable());
        assert!(Error::status(429, "slow down").is_retryable());
    }

    #[test]
    fn test_status_4xx_not_retryable() {
        assert!(!Error::status(404, "Session not found").is_retryable());
        assert!(!Error::status(401, "Unauthorized").is_retryable());
    }

    #[test]
    fn test_timeout_is_transport_and_retryable() {
        let e = Error::Timeout(Duration::from_secs(60));
        assert!(e.is_transport());
        assert!(e.is_retryable());
    }

    #[test]
    fn test_protocol_not_transport() {
        let e = Error::Protocol("bad line".into());
        assert!(!e.is_transport());
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_status_display_includes_detail() {
        let e = Error::status(404, "Session not found");
        assert_eq!(e.to_string(), "HTTP 404: Session not found");
    }
}
