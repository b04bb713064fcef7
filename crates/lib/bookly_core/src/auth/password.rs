//! Password hashing via bcrypt.
//!
//! bcrypt only considers the first 72 bytes of its input. Both hashing and
//! verification truncate the UTF-8 bytes identically so that long passwords
//! verify against their own hash.

use super::AuthError;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// bcrypt input limit in bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

fn truncated(password: &str) -> &[u8] {
    let bytes = password.as_bytes();
    &bytes[..bytes.len().min(MAX_PASSWORD_BYTES)]
}

/// Hash a password with bcrypt (cost 10, random salt per call).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(truncated(password), BCRYPT_COST)
        .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
}

/// Verify a password against a bcrypt hash.
///
/// A mismatch is `Ok(false)`; a malformed hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    bcrypt::verify(truncated(password), hash)
        .map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
}

/// [`hash_password`] on the blocking pool, keeping the runtime free.
pub async fn hash_password_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
}

/// [`verify_password`] on the blocking pool, keeping the runtime free.
pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))?
}
