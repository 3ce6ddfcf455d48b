//! Error types for the resource adapter

use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter errors
#[derive(Error, Debug)]
pub enum Error {
    /// Channel configuration could not be resolved
    #[error("Configuration unavailable for channel {channel_id}: {reason}")]
    ConfigUnavailable {
        /// Channel ID
        channel_id: String,
        /// Reason
        reason: String,
    },

    /// Physical resource cannot be acquired
    #[error("Cannot open resource {resource}: {source}")]
    ResourceOpen {
        /// Resource location
        resource: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Credential does not match the managed connection
    #[error("Security mismatch: {0}")]
    SecurityMismatch(String),

    /// Operation on a destroyed or detached object
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Malformed interaction spec or record
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Feature not supported by this adapter
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Logical transaction boundary error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Timeout
    #[error("Timeout after {seconds}s: {operation}")]
    Timeout {
        /// Timeout duration
        seconds: u64,
        /// Operation
        operation: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// XML error
    #[error("XML error: {0}")]
    Xml(String),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration lookup failure
    pub fn config_unavailable(channel_id: &str, reason: impl Into<String>) -> Self {
        Error::ConfigUnavailable {
            channel_id: channel_id.to_string(),
            reason: reason.into(),
        }
    }
}
