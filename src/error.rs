use thiserror::Error;

/// Custom error types for the proctoring server
#[derive(Debug, Error)]
pub enum ProctorError {
    /// Inbound event errors
    #[error("Invalid event payload: {0}")]
    Validation(String),

    #[error("Unknown incident type: {0}")]
    UnknownIncidentType(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Presence and delivery errors
    #[error("Connection {0} not found")]
    ConnectionNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Storage collaborator errors
    #[error("Exam {0} not found")]
    ExamNotFound(String),

    #[error("Exam {exam_id} cannot move from {from} to {to}")]
    InvalidTransition {
        exam_id: String,
        from: String,
        to: String,
    },

    #[error("Storage error: {0}")]
    Persistence(String),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to load seed file: {0}")]
    SeedLoadFailed(#[from] std::io::Error),
}

/// Convenience type alias for Results using ProctorError
pub type Result<T> = std::result::Result<T, ProctorError>;

impl ProctorError {
    /// Helper to create validation errors for malformed inbound events
    pub fn validation(msg: impl Into<String>) -> Self {
        ProctorError::Validation(msg.into())
    }

    /// Helper to create persistence errors
    pub fn persistence(msg: impl Into<String>) -> Self {
        ProctorError::Persistence(msg.into())
    }
}
