//! Error types for tool invocations.

use thiserror::Error;

/// Errors that reach the caller of [`crate::ToolBridge::run_tool`].
///
/// Execution failures (missing executable, spawn errors, non-zero exit,
/// timeouts) never surface here; the bridge answers them with a simulated
/// result.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool id is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Parameters were rejected before any process was started.
    #[error("Invalid input for {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },

    /// The tool exited successfully but its output could not be parsed.
    #[error("Failed to parse {tool} output: {reason}")]
    Parse { tool: String, reason: String },
}

impl ToolError {
    pub fn invalid(tool: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    pub fn parse(tool: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            tool: tool.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by the caller rather than the tool.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::UnknownTool(_) | Self::InvalidInput { .. })
    }
}

/// Result type for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
