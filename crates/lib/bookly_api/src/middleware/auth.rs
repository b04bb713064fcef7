//! Authentication guard: bearer token extraction, verification, revocation
//! and token-kind checks, plus role-based access control.
//!
//! Every failure of the bearer checks surfaces as [`AppError::InvalidToken`];
//! only an unreachable revocation store is reported differently.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use bookly_core::models::auth::{Role, TokenClaims};

use crate::AppState;
use crate::error::{AppError, AppResult};

/// Key used to store verified `TokenClaims` in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub TokenClaims);

/// Returns the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}

/// Validate the bearer token in `headers`, in order: presence, signature and
/// expiry, revocation, token kind.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    expect_refresh: bool,
) -> AppResult<TokenClaims> {
    let token = bearer_token(headers).ok_or_else(|| {
        debug!("missing or malformed authorization header");
        AppError::InvalidToken
    })?;

    let claims = state.tokens.decode_token(token)?;

    if state.revocations.contains(&claims.jti).await? {
        debug!(jti = %claims.jti, "token revoked");
        return Err(AppError::InvalidToken);
    }

    if claims.refresh != expect_refresh {
        debug!(jti = %claims.jti, refresh = claims.refresh, "wrong token kind");
        return Err(AppError::InvalidToken);
    }

    Ok(claims)
}

/// A bearer extractor accepting one kind of token.
pub trait TokenBearer: Sized {
    /// Required value of the `refresh` claim.
    const REFRESH: bool;

    fn from_claims(claims: TokenClaims) -> Self;

    fn claims(&self) -> &TokenClaims;
}

/// Accepts access tokens only.
#[derive(Debug, Clone)]
pub struct AccessTokenBearer(pub TokenClaims);

/// Accepts refresh tokens only.
#[derive(Debug, Clone)]
pub struct RefreshTokenBearer(pub TokenClaims);

impl TokenBearer for AccessTokenBearer {
    const REFRESH: bool = false;

    fn from_claims(claims: TokenClaims) -> Self {
        Self(claims)
    }

    fn claims(&self) -> &TokenClaims {
        &self.0
    }
}

impl TokenBearer for RefreshTokenBearer {
    const REFRESH: bool = true;

    fn from_claims(claims: TokenClaims) -> Self {
        Self(claims)
    }

    fn claims(&self) -> &TokenClaims {
        &self.0
    }
}

async fn extract_bearer<B: TokenBearer>(parts: &Parts, state: &AppState) -> AppResult<B> {
    // Reuse claims already verified by `require_auth` on this request.
    if !B::REFRESH {
        if let Some(AuthenticatedUser(claims)) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(B::from_claims(claims.clone()));
        }
    }
    authenticate(state, &parts.headers, B::REFRESH)
        .await
        .map(B::from_claims)
}

impl FromRequestParts<AppState> for AccessTokenBearer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        extract_bearer(parts, state).await
    }
}

impl FromRequestParts<AppState> for RefreshTokenBearer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        extract_bearer(parts, state).await
    }
}

/// Axum middleware: requires a valid access token and injects
/// `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let claims = authenticate(&state, request.headers(), false).await?;
    request.extensions_mut().insert(AuthenticatedUser(claims));
    Ok(next.run(request).await)
}

/// Allow-list of roles for a group of routes.
///
/// The role is read from the signed token, so a role change applies from the
/// user's next login or refresh.
#[derive(Debug, Clone)]
pub struct RoleChecker {
    allowed: Arc<[Role]>,
}

impl RoleChecker {
    pub fn new(allowed: impl Into<Arc<[Role]>>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    pub fn check(&self, claims: &TokenClaims) -> AppResult<()> {
        match claims.user.role {
            Some(role) if self.allowed.contains(&role) => Ok(()),
            role => {
                debug!(?role, allowed = ?self.allowed, "role not permitted");
                Err(AppError::InsufficientPermissions)
            }
        }
    }
}

/// Axum middleware: enforces a [`RoleChecker`]. Must run after
/// [`require_auth`].
pub async fn require_role(
    State(checker): State<RoleChecker>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let AuthenticatedUser(claims) = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(AppError::InvalidToken)?;
    checker.check(claims)?;
    Ok(next.run(request).await)
}
