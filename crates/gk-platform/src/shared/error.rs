//! Platform Error Types
//!
//! Every rejection of a token, whatever the underlying reason, surfaces as the
//! single [`PlatformError::Unauthorized`] value so callers cannot tell an
//! expired token from a forged one.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;

/// Body message for every 401 caused by a bad or missing token
pub const UNAUTHORIZED_MESSAGE: &str = "Could not validate credentials";

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Duplicate entity: {entity_type} with {field}={value}")]
    Duplicate { entity_type: String, field: String, value: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Could not validate credentials")]
    Unauthorized,

    #[error("Incorrect username or password")]
    InvalidCredentials,

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(entity_type: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// HTTP status and machine-readable error code
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PlatformError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PlatformError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE"),
            PlatformError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            PlatformError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            PlatformError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            PlatformError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            PlatformError::Conflict { .. } => (StatusCode::CONFLICT, "CONFLICT"),
            PlatformError::Unavailable { .. } | PlatformError::Redis(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
            }
            PlatformError::Database(_)
            | PlatformError::Json(_)
            | PlatformError::Configuration { .. }
            | PlatformError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Message safe to show a client. Backend details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            PlatformError::Unauthorized => UNAUTHORIZED_MESSAGE.to_string(),
            PlatformError::Unavailable { .. } | PlatformError::Redis(_) => {
                "Service temporarily unavailable".to_string()
            }
            PlatformError::Database(_)
            | PlatformError::Json(_)
            | PlatformError::Configuration { .. }
            | PlatformError::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Error response body
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_code();

        if status.is_server_error() {
            error!(error = %self, code = error_type, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.public_message(),
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PlatformError::Unauthorized.status_and_code().0, StatusCode::UNAUTHORIZED);
        assert_eq!(PlatformError::forbidden("x").status_and_code().0, StatusCode::FORBIDDEN);
        assert_eq!(PlatformError::conflict("x").status_and_code(), (StatusCode::CONFLICT, "CONFLICT"));
        assert_eq!(
            PlatformError::duplicate("Principal", "email", "a@b.c").status_and_code(),
            (StatusCode::CONFLICT, "DUPLICATE")
        );
        assert_eq!(
            PlatformError::unavailable("timeout").status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PlatformError::internal("boom").status_and_code().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_response_has_challenge_header() {
        let response = PlatformError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = PlatformError::internal("connection string postgres://secret");
        assert_eq!(err.public_message(), "Internal server error");

        let err = PlatformError::unavailable("registry timed out after 2000ms");
        assert_eq!(err.public_message(), "Service temporarily unavailable");
    }

    #[test]
    fn test_client_errors_keep_message() {
        let err = PlatformError::validation("username too short");
        assert_eq!(err.public_message(), "Validation error: username too short");
        assert_eq!(PlatformError::Unauthorized.public_message(), UNAUTHORIZED_MESSAGE);
    }
}
