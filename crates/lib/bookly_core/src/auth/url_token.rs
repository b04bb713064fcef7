//! URL-safe, timestamped action tokens (email verification, password reset).
//!
//! Wire format: `base64url(json) "." base64url(issued_at) "." base64url(mac)`,
//! where `mac` is HMAC-SHA256 over the first two segments. The MAC key is
//! derived from the secret and a salt, so action tokens never share a key with
//! the signed access/refresh tokens even when the same secret is configured.

use std::time::Duration as StdDuration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use tracing::{debug, warn};

use super::AuthError;
use super::revocation::RevocationStore;

type HmacSha256 = Hmac<Sha256>;

/// Salt separating action tokens from every other use of the secret.
pub const ACTION_TOKEN_SALT: &str = "email-configuration";

/// Payload of an action token.
pub type ActionPayload = Map<String, Value>;

/// What an emailed link authorises. Carried in the payload so a link issued
/// for one flow is refused by the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPurpose {
    VerifyEmail,
    PasswordReset,
}

impl ActionPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionPurpose::VerifyEmail => "verify_email",
            ActionPurpose::PasswordReset => "password_reset",
        }
    }
}

/// A decoded action token.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionToken {
    pub payload: ActionPayload,
    /// Issuance time (unix timestamp, seconds).
    pub issued_at: i64,
    /// Signature segment; unique per payload and issuance second.
    pub signature: String,
}

impl ActionToken {
    /// String field from the payload.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The address this token was issued for, provided it was issued for
    /// `purpose`.
    pub fn email_for(&self, purpose: ActionPurpose) -> Option<&str> {
        if self.get_str("purpose") != Some(purpose.as_str()) {
            debug!(expected = purpose.as_str(), "action token purpose mismatch");
            return None;
        }
        self.get_str("email")
    }

    /// Key under which consumption of this token is recorded.
    pub fn consumption_key(&self) -> String {
        format!("action:{}", self.signature)
    }

    /// Time until the token leaves its `max_age` window, never below one
    /// second.
    pub fn remaining_ttl(&self, max_age: Duration, now: i64) -> StdDuration {
        let left = max_age.num_seconds() - (now - self.issued_at);
        StdDuration::from_secs(u64::try_from(left).unwrap_or(0).max(1))
    }
}

/// Mark `token` as used for the rest of its validity window.
///
/// Returns `Ok(false)` if it had already been used. The check and the write
/// are a single atomic store operation.
pub async fn claim_action_token(
    store: &dyn RevocationStore,
    token: &ActionToken,
    max_age: Duration,
    now: i64,
) -> Result<bool, AuthError> {
    store
        .claim(&token.consumption_key(), token.remaining_ttl(max_age, now))
        .await
}

/// Creates and verifies action tokens.
#[derive(Clone)]
pub struct UrlSafeTokenCodec {
    key: Vec<u8>,
}

impl std::fmt::Debug for UrlSafeTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSafeTokenCodec").finish_non_exhaustive()
    }
}

impl UrlSafeTokenCodec {
    pub fn new(secret: &[u8], salt: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Validation("action token secret is empty".into()));
        }
        let mut mac = mac_with_key(secret)?;
        mac.update(salt.as_bytes());
        mac.update(b"signer");
        Ok(Self {
            key: mac.finalize().into_bytes().to_vec(),
        })
    }

    /// Encode `data` with the current time embedded.
    pub fn create_url_safe_token(&self, data: &ActionPayload) -> Result<String, AuthError> {
        self.create_at(data, Utc::now().timestamp())
    }

    fn create_at(&self, data: &ActionPayload, issued_at: i64) -> Result<String, AuthError> {
        let json = serde_json::to_vec(data)
            .map_err(|e| AuthError::TokenError(format!("action token encode: {e}")))?;
        let body = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(json),
            URL_SAFE_NO_PAD.encode(issued_at.to_be_bytes())
        );
        let mut mac = mac_with_key(&self.key)?;
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{body}.{signature}"))
    }

    /// Decode the payload if the token is intact and no older than `max_age`.
    pub fn decode_url_safe_token(
        &self,
        token: &str,
        max_age: Duration,
    ) -> Result<ActionPayload, AuthError> {
        self.decode(token, max_age).map(|t| t.payload)
    }

    /// Like [`Self::decode_url_safe_token`] but keeps the issuance metadata.
    pub fn decode(&self, token: &str, max_age: Duration) -> Result<ActionToken, AuthError> {
        let mut parts = token.split('.');
        let (Some(payload_b64), Some(ts_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            debug!("action token has wrong segment count");
            return Err(AuthError::InvalidToken);
        };

        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::InvalidToken)?;
        let mut mac = mac_with_key(&self.key)?;
        mac.update(payload_b64.as_bytes());
        mac.update(b".");
        mac.update(ts_b64.as_bytes());
        if mac.verify_slice(&sig).is_err() {
            warn!("action token signature mismatch");
            return Err(AuthError::InvalidToken);
        }

        let ts_bytes: [u8; 8] = URL_SAFE_NO_PAD
            .decode(ts_b64)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(AuthError::InvalidToken)?;
        let issued_at = i64::from_be_bytes(ts_bytes);

        let age = Utc::now().timestamp() - issued_at;
        if age < 0 || age > max_age.num_seconds() {
            debug!(age, max_age = max_age.num_seconds(), "action token outside age window");
            return Err(AuthError::InvalidToken);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .ok()
            .and_then(|json| serde_json::from_slice::<ActionPayload>(&json).ok())
            .ok_or(AuthError::InvalidToken)?;

        Ok(ActionToken {
            payload,
            issued_at,
            signature: sig_b64.to_string(),
        })
    }
}

fn mac_with_key(key: &[u8]) -> Result<HmacSha256, AuthError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AuthError::Internal(format!("hmac key: {e}")))
}

/// Payload `{"email": .., "purpose": ..}` used by verification and reset links.
pub fn email_payload(email: &str, purpose: ActionPurpose) -> ActionPayload {
    let mut map = Map::new();
    map.insert("email".into(), Value::String(email.to_string()));
    map.insert("purpose".into(), Value::String(purpose.as_str().to_string()));
    map
}
