//! Error types for Agora operations

/// Result type for Agora operations
pub type Result<T> = std::result::Result<T, AgoraError>;

/// Error types for the coordination core
#[derive(Debug, thiserror::Error)]
pub enum AgoraError {
    /// Conversation not found in the state store
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Persistence collaborator failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for AgoraError {
    fn from(s: String) -> Self {
        AgoraError::Other(s)
    }
}

impl From<&str> for AgoraError {
    fn from(s: &str) -> Self {
        AgoraError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for AgoraError {
    fn from(err: anyhow::Error) -> Self {
        AgoraError::Other(err.to_string())
    }
}
