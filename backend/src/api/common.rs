//! Error handling utilities for API responses.
//!
//! Provides the response envelope and the conversion from `AuthError` to HTTP.
//!
//! # Response Format
//! All errors return consistent JSON responses containing:
//! - `message`: Short human-readable reason
//! - `error_type`: Machine-readable error category
//! - `details`: Optional field-specific validation errors
//!
//! Authentication decisions (bad password, bad OTP, dead or reused token,
//! disabled account) all collapse into one `unauthorized` body. The real
//! cause is logged server side and never reaches the client.

use crate::errors::AuthError;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Standard API response wrapper for all endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Indicates if the request was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable message
    pub message: String,
    /// Error details (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    /// Request timestamp
    pub timestamp: String,
}

/// Error details for failed requests
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error type identifier
    pub error_type: String,
    /// Field-specific validation errors when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// Field-specific validation error details
#[derive(Debug, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the field with validation error
    pub field: String,
    /// Description of the validation failure
    pub message: String,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a successful response with default message
    pub fn ok(data: T) -> Self {
        Self::success(data, "Request successful")
    }

    /// Create an error response
    pub fn error(
        message: impl Into<String>,
        error_type: impl Into<String>,
        details: Option<Vec<FieldError>>,
    ) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            message: message.into(),
            error: Some(ErrorDetails {
                error_type: error_type.into(),
                details,
            }),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn error_body(message: &str, error_type: &str, details: Option<Vec<FieldError>>) -> String {
    serde_json::to_string(&ApiResponse::<()>::error(message, error_type, details))
        .unwrap_or_else(|_| format!(r#"{{"success":false,"message":"{message}"}}"#))
}

/// Converts AuthError to appropriate HTTP response with standard format
pub fn auth_error_to_http(error: AuthError) -> (StatusCode, String) {
    if error.is_auth_decision() {
        tracing::debug!("authentication rejected: {}", error);
        return (
            StatusCode::UNAUTHORIZED,
            error_body("unauthorized", "unauthorized", None),
        );
    }

    let (status, error_type, message) = match &error {
        AuthError::Validation { message } => {
            (StatusCode::BAD_REQUEST, "validation_error", message.clone())
        }
        AuthError::Timeout(_) => {
            tracing::warn!("Store timeout: {}", error);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "temporarily_unavailable",
                "Service temporarily unavailable, please retry".to_string(),
            )
        }
        _ => {
            tracing::error!(retryable = error.is_retryable(), "Internal error: {}", error);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error".to_string(),
            )
        }
    };

    (status, error_body(&message, error_type, None))
}

/// Formats validator::ValidationErrors into field-specific error details
pub fn validation_errors_to_field_errors(errors: validator::ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| FieldError {
                field: field.to_string(),
                message: error
                    .message
                    .as_ref()
                    .unwrap_or(&"Invalid value".into())
                    .to_string(),
            })
        })
        .collect()
}

/// Helper to create validation error response
pub fn validation_error_response(errors: validator::ValidationErrors) -> (StatusCode, String) {
    let field_errors = validation_errors_to_field_errors(errors);
    (
        StatusCode::BAD_REQUEST,
        error_body("Validation failed", "validation_error", Some(field_errors)),
    )
}
