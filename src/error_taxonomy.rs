//! Error envelope shared by the executor, the conversation loop and the CLI.

use crate::core::error::SchedulerError;
use crate::tools::spec::ToolError;

/// Broad category for typed error handling and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    InvalidInput,
    Authorization,
    Tool,
    State,
    Cancelled,
    Internal,
}

/// Severity hint for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Unified envelope used when crossing subsystem boundaries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        recoverable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            recoverable,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Envelope for an invocation that was cut short by cancellation.
    #[must_use]
    pub fn cancelled(tool_name: &str) -> Self {
        Self::new(
            ErrorCategory::Cancelled,
            ErrorSeverity::Info,
            true,
            "tool_cancelled",
            format!("Tool '{tool_name}' was cancelled before it produced a result"),
        )
    }
}

impl From<&ToolError> for ErrorEnvelope {
    fn from(value: &ToolError) -> Self {
        match value {
            ToolError::InvalidInput { message } => Self::new(
                ErrorCategory::InvalidInput,
                ErrorSeverity::Error,
                false,
                "tool_invalid_input",
                message.clone(),
            ),
            ToolError::MissingField { field } => Self::new(
                ErrorCategory::InvalidInput,
                ErrorSeverity::Error,
                false,
                "tool_missing_field",
                format!("Missing required field: {field}"),
            ),
            ToolError::PathEscape { path } => Self::new(
                ErrorCategory::Authorization,
                ErrorSeverity::Error,
                false,
                "tool_path_escape",
                format!("Path escapes workspace: {}", path.display()),
            ),
            ToolError::ExecutionFailed { message } => Self::new(
                ErrorCategory::Tool,
                ErrorSeverity::Error,
                true,
                "tool_execution_failed",
                message.clone(),
            ),
            ToolError::Timeout { seconds } => Self::new(
                ErrorCategory::Timeout,
                ErrorSeverity::Warning,
                true,
                "tool_timeout",
                format!("Tool timed out after {seconds}s"),
            ),
            ToolError::NotAvailable { message } => Self::new(
                ErrorCategory::State,
                ErrorSeverity::Error,
                false,
                "tool_not_available",
                message.clone(),
            ),
        }
    }
}

impl From<ToolError> for ErrorEnvelope {
    fn from(value: ToolError) -> Self {
        Self::from(&value)
    }
}

impl From<&SchedulerError> for ErrorEnvelope {
    fn from(value: &SchedulerError) -> Self {
        match value {
            SchedulerError::InvariantViolation { message } => Self::new(
                ErrorCategory::Internal,
                ErrorSeverity::Critical,
                false,
                "scheduler_invariant_violation",
                message.clone(),
            ),
        }
    }
}
