// Copilot error types

use thiserror::Error;

/// Library-wide error type.
#[derive(Error, Debug)]
pub enum CopilotError {
    /// Connection failed
    #[error("Cannot connect to service: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Invalid or expired API key: {0}")]
    AuthFailed(String),

    /// Rate limited
    #[error("API rate limit exceeded, please try again later")]
    RateLimited,

    /// Request timeout
    #[error("Service response timeout")]
    Timeout,

    /// Error reported by the assistant backend
    #[error("Assistant service error: {0}")]
    ApiError(String),

    /// Error reported by the remote workflow service
    #[error("Workflow service error ({status}): {message}")]
    WorkflowApiError { status: u16, message: String },

    /// JSON parsing error
    #[error("Response parse error: {0}")]
    ParseError(String),

    /// Persistence read/write error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// No workflow id can be resolved for the active session
    #[error("No workflow is associated with this conversation")]
    MissingWorkflowKey,

    /// The workflow service transport is not configured
    #[error("Workflow service credentials are not configured")]
    MissingCredentials,

    /// The proposed fragment has no usable structure
    #[error("The assistant response contains no usable workflow fragment")]
    EmptyFragment,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for CopilotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CopilotError::Timeout
        } else if err.is_connect() {
            CopilotError::ConnectionFailed(err.to_string())
        } else {
            CopilotError::ApiError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CopilotError {
    fn from(err: serde_json::Error) -> Self {
        CopilotError::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for CopilotError {
    fn from(err: std::io::Error) -> Self {
        CopilotError::IoError(err.to_string())
    }
}

/// Result type for copilot operations
pub type CopilotResult<T> = Result<T, CopilotError>;
