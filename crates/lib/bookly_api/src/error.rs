//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use bookly_core::auth::AuthError;
use bookly_core::mail::MailError;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Deliberately uninformative: never says which check failed.
    #[error("Token is invalid or expired")]
    InvalidToken,

    #[error("You do not have enough permissions to perform this action")]
    InsufficientPermissions,

    #[error("Account not verified. Please check your email.")]
    AccountNotVerified,

    #[error("User not found")]
    UserNotFound,

    #[error("User with this email already exists")]
    UserAlreadyExists,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service temporarily unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AppError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "insufficient_permissions")
            }
            AppError::AccountNotVerified => (StatusCode::FORBIDDEN, "account_not_verified"),
            AppError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
            AppError::UserAlreadyExists => (StatusCode::CONFLICT, "user_already_exists"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                "Internal server error".to_string()
            }
            AppError::StoreUnavailable(detail) => {
                error!(detail = %detail, "revocation store unavailable");
                "Service temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::InvalidToken => AppError::InvalidToken,
            AuthError::TokenError(msg) => AppError::Internal(msg),
            AuthError::StoreUnavailable(msg) => AppError::StoreUnavailable(msg),
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::DbError(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<MailError> for AppError {
    fn from(e: MailError) -> Self {
        AppError::Internal(e.to_string())
    }
}
