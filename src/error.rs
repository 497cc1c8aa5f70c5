//! Error types for Chartsmith
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::engine::EngineKind;

/// All error types that can occur in Chartsmith
#[derive(Debug, Error)]
pub enum ChartsmithError {
    /// No tool is registered under the given path key
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A supplied parameter failed schema validation
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Required parameters are still missing (recovered into a clarification turn)
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingRequiredParameter(Vec<String>),

    /// The tool does not support the requested engine
    #[error("Tool '{tool}' does not support the {engine} engine")]
    UnsupportedEngine { tool: String, engine: EngineKind },

    /// The rendering backend failed; carries a truncated, scrubbed diagnostic
    #[error("Engine execution failed: {0}")]
    EngineExecution(String),

    /// The rendering backend exceeded its time budget and was killed
    #[error("Execution timed out after {0}ms")]
    ExecutionTimeout(u64),

    /// A tool definition could not be loaded (tool excluded, load continues)
    #[error("Catalog load error in {path}: {reason}")]
    CatalogLoad { path: String, reason: String },

    /// The tool storage root cannot be read
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Another turn is already in progress for this conversation
    #[error("Conversation {0} is busy, retry shortly")]
    ConcurrentConversationConflict(String),

    /// The execution queue is full
    #[error("Execution queue is full ({0} waiting)")]
    Overloaded(usize),

    /// Free-text interpretation failed
    #[error("Interpretation error: {0}")]
    Interpretation(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ChartsmithError {
    /// Failures the caller may resolve by resubmitting the same request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EngineExecution(_)
                | Self::ExecutionTimeout(_)
                | Self::ConcurrentConversationConflict(_)
                | Self::Overloaded(_)
        )
    }

    /// Failures whose message is safe and meaningful to show to the user
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::InvalidParameter { .. }
                | Self::UnsupportedEngine { .. }
                | Self::EngineExecution(_)
                | Self::ExecutionTimeout(_)
                | Self::ConcurrentConversationConflict(_)
                | Self::Overloaded(_)
        )
    }
}

/// Result type alias for Chartsmith operations
pub type Result<T> = std::result::Result<T, ChartsmithError>;
