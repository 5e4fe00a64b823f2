//! Error types for Mnemo

use thiserror::Error;

/// Result type alias for Mnemo operations
pub type Result<T> = std::result::Result<T, MnemoError>;

/// Main error type for Mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Broker not configured")]
    BrokerNotConfigured,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Completion backend error: {0}")]
    Completion(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MnemoError {
    /// Check if error is retryable by the background consumer loop
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MnemoError::Broker(_) | MnemoError::EventLog(_) | MnemoError::Completion(_)
        )
    }
}
