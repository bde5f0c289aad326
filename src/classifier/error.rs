//! Classifier error types

use thiserror::Error;

/// Classification failure with a coarse kind for logging and retry decisions
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ClassifierError {
    pub kind: ClassifierErrorKind,
    pub message: String,
}

impl ClassifierError {
    pub fn new(kind: ClassifierErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::InvalidRequest, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::Timeout, message)
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::Input, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::MalformedResponse, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ClassifierErrorKind::Unknown, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierErrorKind {
    /// Connection failures - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Missing or rejected API key
    Auth,
    /// Bad request (400)
    InvalidRequest,
    /// The call did not finish within its bound
    Timeout,
    /// The image could not be read locally
    Input,
    /// The model answered with something other than the expected JSON
    MalformedResponse,
    Unknown,
}

impl ClassifierErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::ServerError | Self::Timeout
        )
    }
}
