use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::SourceStatus;

/// Application-specific error types surfaced by the HTTP layer.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Request conflicts with the current run state.
    Conflict(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => {
                tracing::warn!("Rejected request: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return (**source).clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Failure modes of a single registry call.
///
/// These never leave an adapter: [`SourceError::status`] folds each one into
/// the status field of the produced fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Required identifying field missing; no call attempted.
    NoInput(&'static str),
    /// Source cannot be attempted with the current resources or configuration.
    Unavailable(String),
    /// Network failure or timeout on a direct route, or a retryable HTTP status.
    Transient(String),
    /// Failure on a proxied route. The proxy gets retired.
    ProxyFailure { proxy: String, reason: String },
    /// Captcha not resolved within its budget. Terminal for the call.
    CaptchaUnsolved,
    /// Response body or page structure unusable as a whole.
    ParseError(String),
    /// Registry answered with a non-retryable HTTP status.
    Rejected(u16),
}

impl SourceError {
    /// Whether a bounded in-adapter retry may be attempted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_) | SourceError::ProxyFailure { .. }
        )
    }

    pub fn status(&self) -> SourceStatus {
        match self {
            SourceError::NoInput(_) => SourceStatus::NoInput,
            SourceError::Unavailable(_) => SourceStatus::Unavailable,
            _ => SourceStatus::Error,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NoInput(field) => write!(f, "missing required field: {}", field),
            SourceError::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
            SourceError::Transient(msg) => write!(f, "transient failure: {}", msg),
            SourceError::ProxyFailure { proxy, reason } => {
                write!(f, "proxy {} failed: {}", proxy, reason)
            }
            SourceError::CaptchaUnsolved => write!(f, "captcha not solved within budget"),
            SourceError::ParseError(msg) => write!(f, "parse error: {}", msg),
            SourceError::Rejected(status) => write!(f, "registry returned status {}", status),
        }
    }
}

impl std::error::Error for SourceError {}

/// Run-level failures. The only errors that reach the run state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// Accumulated lead errors exceeded the configured ceiling.
    BatchFatal { errors: usize, ceiling: usize },
    /// The caller cancelled the run.
    Cancelled,
    /// The result sink refused the records.
    Sink(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::BatchFatal { errors, ceiling } => write!(
                f,
                "Too many lead errors: {} exceeded the ceiling of {}",
                errors, ceiling
            ),
            RunError::Cancelled => write!(f, "Scoring run cancelled"),
            RunError::Sink(msg) => write!(f, "Failed to emit results: {}", msg),
        }
    }
}

impl std::error::Error for RunError {}
