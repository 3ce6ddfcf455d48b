//! Error types for message bus

use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Processing of a submitted message failed
    #[error("Processing failed (retryable: {retryable}): {reason}")]
    Processing {
        /// Whether a later resubmission may succeed
        retryable: bool,
        /// Reason
        reason: String,
    },

    /// Message processor not (yet) available
    #[error("Message processor unavailable: {0}")]
    Unavailable(String),

    /// Malformed message or unknown vocabulary value
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl Error {
    /// Whether the failure is transient
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Processing { retryable, .. } => *retryable,
            Error::Unavailable(_) => true,
            Error::InvalidMessage(_) => false,
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
