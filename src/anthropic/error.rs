//! Completion endpoint error types

use thiserror::Error;

/// Failures at the completion endpoint boundary. Only rate limiting
/// gets special treatment by callers; every other variant is a
/// generic transport or endpoint failure.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl CompletionError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Transport(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            Self::Transport(format!("Connection failed: {}", e))
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CompletionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
