//! Error Types
//!
//! Every component converts its internal failures into one of these
//! variants before returning. User-facing text is produced only by
//! [`ErrorHandler`](crate::monitor::ErrorHandler).

use thiserror::Error;

use crate::monitor::ErrorCategory;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Caller input failed validation (empty, too long, bad tool arguments)
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Conversation memory could not be read or written
    #[error("Memory storage error: {0}")]
    MemoryStorage(String),

    /// A tool failed, was unknown, or panicked
    #[error("Tool '{tool_name}' failed: {message}")]
    ToolExecution { tool_name: String, message: String },

    /// LLM provider failure: transport, auth, timeout or malformed response
    #[error("LLM API error{}: {message}", .status_code.map(|c| format!(" ({c})")).unwrap_or_default())]
    LlmApi {
        status_code: Option<u16>,
        message: String,
    },

    /// Prompt does not fit the model's token budget
    #[error("Context window exceeded: {token_count} tokens (max: {max_tokens})")]
    ContextWindowExceeded { token_count: usize, max_tokens: usize },

    /// Content policy violation
    #[error("Governance violation [{category}]: {message}")]
    Governance { category: String, message: String },

    /// Network failure outside of a completion call (health checks, host I/O)
    #[error("Network error: {0}")]
    Network(String),

    /// Internal error (configuration, loop bounds, invariants)
    #[error("System error: {0}")]
    System(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    pub fn llm(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            status_code,
            message: message.into(),
        }
    }

    /// Provider call exceeded its deadline
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::llm(
            Some(408),
            format!("provider call timed out after {}ms", after.as_millis()),
        )
    }

    /// Category this error is reported under
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InputValidation(_) => ErrorCategory::Input,
            Self::MemoryStorage(_) => ErrorCategory::Memory,
            Self::ToolExecution { .. } => ErrorCategory::Tool,
            Self::LlmApi { .. } => ErrorCategory::Llm,
            Self::ContextWindowExceeded { .. } => ErrorCategory::Context,
            Self::Governance { .. } => ErrorCategory::Governance,
            Self::Network(_) => ErrorCategory::Network,
            Self::System(_) | Self::Json(_) => ErrorCategory::System,
        }
    }

    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::System(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_display_includes_status() {
        let err = AgentError::llm(Some(429), "slow down");
        assert_eq!(err.to_string(), "LLM API error (429): slow down");

        let err = AgentError::llm(None, "connection reset");
        assert_eq!(err.to_string(), "LLM API error: connection reset");
    }

    #[test]
    fn test_timeout_is_retryable_llm_error() {
        let err = AgentError::timeout(std::time::Duration::from_millis(50));
        assert_eq!(err.category(), ErrorCategory::Llm);
        assert!(err.is_retryable());
        assert!(matches!(err, AgentError::LlmApi { status_code: Some(408), .. }));
    }

    #[test]
    fn test_json_error_is_system() {
        let err: AgentError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), ErrorCategory::System);
    }
}
