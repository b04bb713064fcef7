//! Authentication and token-lifecycle logic.
//!
//! Provides password hashing, signed access/refresh tokens, URL-safe action
//! tokens, the revocation store, and user-record queries shared by
//! `bookly_api`.

pub mod jwt;
pub mod password;
pub mod queries;
pub mod revocation;
pub mod url_token;

use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Any decode, signature, expiry, revocation or token-kind failure.
    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Revocation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
