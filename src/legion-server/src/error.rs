//! Error types for the control plane.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use legion_tools::ToolError;
use serde::Serialize;
use thiserror::Error;

use crate::legion::LegionError;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credentials were presented but rejected.
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Unknown target or rejected parameters.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A legion lifecycle operation failed.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// A tool ran successfully but its output could not be parsed.
    #[error("Tool output error: {0}")]
    ToolOutput(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OperationFailed(_) | Self::ToolOutput(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_failed",
            Self::Authorization(_) => "not_authorized",
            Self::Validation(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::OperationFailed(_) => "operation_failed",
            Self::ToolOutput(_) => "tool_output_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for the control plane.
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::BadRequest(error.to_string())
    }
}

impl From<ToolError> for AppError {
    fn from(error: ToolError) -> Self {
        if error.is_caller_error() {
            Self::Validation(error.to_string())
        } else {
            Self::ToolOutput(error.to_string())
        }
    }
}

impl From<LegionError> for AppError {
    fn from(error: LegionError) -> Self {
        match error {
            LegionError::Unconfigured(_) => Self::Validation(error.to_string()),
            LegionError::Operation { .. } => Self::OperationFailed(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::Authentication("test".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Authorization("test".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::Validation("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_tool_errors_map_by_cause() {
        let rejected: AppError = ToolError::invalid("nmap", "bad target").into();
        assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);

        let unknown: AppError = ToolError::UnknownTool("x".into()).into();
        assert_eq!(unknown.error_code(), "validation_error");

        let parse: AppError = ToolError::parse("nmap", "garbage").into();
        assert_eq!(parse.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(parse.error_code(), "tool_output_error");
    }

    #[test]
    fn test_legion_errors() {
        let unconfigured: AppError = LegionError::Unconfigured(9999).into();
        assert_eq!(unconfigured.status_code(), StatusCode::BAD_REQUEST);
    }
}
