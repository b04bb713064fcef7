//! Signed access/refresh token issuance and verification.

use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{TokenClaims, TokenUser};

/// Access token lifetime: 1 hour.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 3600;

/// Default refresh token lifetime: 2 days.
pub const DEFAULT_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 2;

/// Issues and verifies compact signed tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec for an HMAC algorithm (HS256/HS384/HS512).
    pub fn new(secret: &[u8], algorithm: Algorithm) -> Result<Self, AuthError> {
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::Validation(format!(
                "unsupported signing algorithm {algorithm:?}, expected HS256/HS384/HS512"
            )));
        }
        if secret.is_empty() {
            return Err(AuthError::Validation("signing secret is empty".into()));
        }
        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Sign a token for `user`. `expiry` defaults to one hour.
    pub fn create_access_token(
        &self,
        user: TokenUser,
        expiry: Option<Duration>,
        refresh: bool,
    ) -> Result<String, AuthError> {
        let expiry = expiry.unwrap_or_else(|| Duration::seconds(ACCESS_TOKEN_EXPIRY_SECS));
        self.issue(user, expiry, refresh).map(|(token, _)| token)
    }

    /// Sign a token and return it together with the claims it carries.
    pub fn issue(
        &self,
        user: TokenUser,
        expiry: Duration,
        refresh: bool,
    ) -> Result<(String, TokenClaims), AuthError> {
        if expiry <= Duration::zero() {
            return Err(AuthError::Validation(
                "token expiry must be positive".into(),
            ));
        }
        let exp = Utc::now()
            .checked_add_signed(expiry)
            .ok_or_else(|| AuthError::Validation("token expiry out of range".into()))?;
        let claims = TokenClaims {
            user,
            exp: exp.timestamp(),
            jti: Uuid::new_v4().to_string(),
            refresh,
        };
        let token = self.encode_claims(&claims)?;
        Ok((token, claims))
    }

    fn encode_claims(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))
    }

    /// Verify signature and expiry, returning the full claims or
    /// [`AuthError::InvalidToken`].
    ///
    /// A token whose `exp` equals the current second is already expired.
    pub fn decode_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;

        let claims = decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "token decode failed");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.exp <= Utc::now().timestamp() {
            debug!(exp = claims.exp, "token expired at boundary");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }
}
