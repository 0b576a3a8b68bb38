use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// SurveyMonkey rejected the client id / client secret pair.
    InvalidCredentials(String),
    /// Any failed call to the SurveyMonkey API (transport or non-success status).
    ExternalApiError(String),
    /// Operator-facing validation messages that block a settings save.
    ValidationFailed(Vec<String>),
    /// Failure talking to the submission record store.
    SubmissionStore(String),
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
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
            AppError::InvalidCredentials(msg) => write!(f, "Invalid credentials: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::ValidationFailed(messages) => {
                write!(f, "Validation failed: {}", messages.join("; "))
            }
            AppError::SubmissionStore(msg) => write!(f, "Submission store error: {}", msg),
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// True when the root cause is rejected SurveyMonkey credentials.
    pub fn is_invalid_credentials(&self) -> bool {
        match self {
            AppError::InvalidCredentials(_) => true,
            AppError::WithContext { source, .. } => source.is_invalid_credentials(),
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InvalidCredentials(msg) => {
                tracing::warn!("Invalid SurveyMonkey credentials: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "error": "Invalid client id or client secret" }),
                )
            }
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "External service error" }),
                )
            }
            AppError::ValidationFailed(messages) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "Validation failed", "messages": messages }),
            ),
            AppError::SubmissionStore(msg) => {
                tracing::error!("Submission store error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Submission store error" }),
                )
            }
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Database error" }),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return (*source).into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_credentials_seen_through_context() {
        let err: Result<(), AppError> =
            Err(AppError::InvalidCredentials("invalid_client".to_string()));
        let wrapped = err.context("Connecting to SurveyMonkey").unwrap_err();

        assert!(wrapped.is_invalid_credentials());
        assert!(wrapped.to_string().starts_with("Connecting to SurveyMonkey"));
    }

    #[test]
    fn test_validation_failed_status() {
        let response =
            AppError::ValidationFailed(vec!["Exit Poll survey does not exist.".to_string()])
                .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
