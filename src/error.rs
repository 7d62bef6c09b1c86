//! Error types for calbot
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in calbot
#[derive(Debug, Error)]
pub enum CalbotError {
    /// Missing or invalid configuration value (fatal at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Token acquisition returned no access token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Tool name not present in the registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool name registered twice
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// Arguments do not satisfy the tool's parameter schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Non-success status from the calendar backend
    #[error("Calendar backend error {status}: {message}")]
    Backend { status: u16, message: String },

    /// Tool transport disconnected or misbehaved
    #[error("Transport error: {0}")]
    Transport(String),

    /// Orchestrator API error
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// Run ended in a failed terminal state
    #[error("Run failed: {0}")]
    RunFailed(String),

    /// Run never settled within the poll budget
    #[error("Run did not finish after {0} polls")]
    RunTimeout(u32),

    /// Date/time or time zone parsing error
    #[error("Time error: {0}")]
    Time(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CalbotError {
    /// Whether the error belongs to a single tool invocation rather than the
    /// session. Such errors are reported inside the tool result.
    pub fn is_handler_error(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Backend { .. } | Self::InvalidArguments(_) | Self::Time(_) | Self::Http(_)
        )
    }
}

/// Result type alias for calbot operations
pub type Result<T> = std::result::Result<T, CalbotError>;
