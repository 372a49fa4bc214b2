//! Comprehensive error handling for the application

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::StoreError;

/// Error response structure for consistent API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub correlation_id: String,
    pub timestamp: String,
}

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    // Validation errors
    #[error("Invalid request format")]
    InvalidRequestFormat(String),

    #[error("Unknown source: {name}")]
    UnknownSource { name: String },

    #[error("Invalid field value: {field}")]
    InvalidFieldValue { field: String, message: String },

    // Resource errors
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    // Structural rejection of a scraped payload
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    // Admission control
    #[error("Pipeline backpressure: {stage} queue above high-water mark")]
    Backpressure { stage: String },

    // External service errors
    #[error("External service unavailable: {service}")]
    ExternalServiceUnavailable { service: String },

    #[error("External service error: {service}")]
    ExternalServiceError { service: String, message: String },

    // Database errors
    #[error("Database connection failed")]
    DatabaseConnectionFailed,

    #[error("Database query failed")]
    DatabaseQueryFailed(sqlx::Error),

    #[error("Database constraint violation")]
    DatabaseConstraintViolation(String),

    // System errors
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal server error")]
    Internal { message: Option<String> },

    #[error("Service unavailable")]
    ServiceUnavailable,

    // JSON parsing errors
    #[error("JSON parsing error")]
    JsonParsingError(#[from] JsonRejection),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::InvalidRequestFormat(_)
            | AppError::UnknownSource { .. }
            | AppError::InvalidFieldValue { .. }
            | AppError::JsonParsingError(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::DatabaseConstraintViolation(_) => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::InvalidPayload { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 502 Bad Gateway
            AppError::ExternalServiceUnavailable { .. } | AppError::ExternalServiceError { .. } => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            AppError::ServiceUnavailable
            | AppError::Backpressure { .. }
            | AppError::DatabaseConnectionFailed => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidRequestFormat(_) => "INVALID_REQUEST_FORMAT",
            AppError::UnknownSource { .. } => "UNKNOWN_SOURCE",
            AppError::InvalidFieldValue { .. } => "INVALID_FIELD_VALUE",
            AppError::NotFound { .. } => "RESOURCE_NOT_FOUND",
            AppError::InvalidPayload { .. } => "INVALID_PAYLOAD",
            AppError::Backpressure { .. } => "PIPELINE_BACKPRESSURE",
            AppError::ExternalServiceUnavailable { .. } => "EXTERNAL_SERVICE_UNAVAILABLE",
            AppError::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::DatabaseConnectionFailed => "DATABASE_CONNECTION_FAILED",
            AppError::DatabaseQueryFailed(_) => "DATABASE_QUERY_FAILED",
            AppError::DatabaseConstraintViolation(_) => "DATABASE_CONSTRAINT_VIOLATION",
            AppError::ConfigurationError { .. } => "CONFIGURATION_ERROR",
            AppError::Internal { .. } => "INTERNAL_SERVER_ERROR",
            AppError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            AppError::JsonParsingError(_) => "JSON_PARSING_ERROR",
        }
    }

    /// Get user-friendly message for this error
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidRequestFormat(msg) => format!("Invalid request format: {}", msg),
            AppError::UnknownSource { name } => {
                format!("'{}' is not a supported scrape source", name)
            }
            AppError::InvalidFieldValue { field, message } => {
                format!("Invalid value for {}: {}", field, message)
            }
            AppError::NotFound { resource } => format!("{} not found", resource),
            AppError::InvalidPayload { reason } => format!("Payload rejected: {}", reason),
            AppError::Backpressure { stage } => {
                format!("Ingestion is throttled ({} stage is saturated), retry later", stage)
            }
            AppError::ExternalServiceUnavailable { service } => {
                format!("{} is currently unavailable", service)
            }
            AppError::ExternalServiceError { service, .. } => {
                format!("Error communicating with {}", service)
            }
            _ => "An unexpected error occurred".to_string(),
        }
    }

    /// Get error details for debugging
    pub fn error_details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::DatabaseQueryFailed(e) => Some(json!({
                "database_error": e.to_string()
            })),
            AppError::ExternalServiceError { message, .. } => Some(json!({
                "service_message": message
            })),
            AppError::InvalidPayload { reason } => Some(json!({
                "reason": reason
            })),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        let error_code = self.error_code();

        // Severity follows the status: our 5xx faults are errors, upstream
        // 502s are warnings, everything the caller caused is informational.
        if status == StatusCode::BAD_GATEWAY {
            tracing::warn!(
                correlation_id = %correlation_id,
                error_code = %error_code,
                error = %self,
                "Upstream service failed"
            );
        } else if status.is_server_error() {
            tracing::error!(
                correlation_id = %correlation_id,
                error_code = %error_code,
                error = %self,
                "Request failed"
            );
        } else {
            tracing::info!(
                correlation_id = %correlation_id,
                error_code = %error_code,
                error = %self,
                "Request rejected"
            );
        }

        let error_response = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            message: self.user_message(),
            details: self.error_details(),
            correlation_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

// Conversion implementations for common error types
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(resource) => AppError::NotFound { resource },
            StoreError::Constraint(message) => AppError::DatabaseConstraintViolation(message),
            StoreError::Database(db_err) => db_err.into(),
            StoreError::Other(e) => AppError::Internal {
                message: Some(e.to_string()),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;
        match &err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation => {
                    AppError::DatabaseConstraintViolation("unique constraint violated".to_string())
                }
                ErrorKind::ForeignKeyViolation => AppError::DatabaseConstraintViolation(
                    "foreign key constraint violated".to_string(),
                ),
                ErrorKind::CheckViolation | ErrorKind::NotNullViolation => {
                    AppError::DatabaseConstraintViolation("row constraint violated".to_string())
                }
                _ => AppError::DatabaseQueryFailed(err),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AppError::DatabaseConnectionFailed
            }
            _ => AppError::DatabaseQueryFailed(err),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: Some(err.to_string()),
        }
    }
}

/// Result type alias for application errors
pub type Result<T> = std::result::Result<T, AppError>;
