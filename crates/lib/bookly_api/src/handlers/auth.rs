//! Authentication request handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::{AccessTokenBearer, AuthenticatedUser, RefreshTokenBearer};
use crate::models::{
    EmailRequest, LoginRequest, LoginResponse, MessageResponse, PasswordResetConfirmRequest,
    PasswordResetRequest, SignupRequest, SignupResponse, TokenPairResponse, UserResponse,
};
use crate::services::auth;

/// `POST /auth/signup`: create an unverified account and mail a
/// verification link.
pub async fn signup_handler(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let resp = auth::signup(&state, body).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `GET /auth/verify/{token}`: confirm an email address.
pub async fn verify_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::verify_email(&state, &token).await?;
    Ok(Json(resp))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let resp = auth::login(&state, body).await?;
    Ok(Json(resp))
}

/// `GET /auth/refresh_token`: exchange a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    RefreshTokenBearer(claims): RefreshTokenBearer,
) -> AppResult<Json<TokenPairResponse>> {
    let resp = auth::refresh(&state, &claims).await?;
    Ok(Json(resp))
}

/// `GET /auth/logout`: revoke the presented access token.
pub async fn logout_handler(
    State(state): State<AppState>,
    AccessTokenBearer(claims): AccessTokenBearer,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::logout(&state, &claims).await?;
    Ok(Json(resp))
}

/// `GET /auth/me`: the authenticated user's record.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UserResponse>> {
    let resp = auth::current_user(&state, &claims).await?;
    Ok(Json(resp))
}

/// `POST /auth/password-reset-request`: mail a reset link.
pub async fn password_reset_request_handler(
    State(state): State<AppState>,
    Json(body): Json<PasswordResetRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::password_reset_request(&state, body)?;
    Ok(Json(resp))
}

/// `POST /auth/password-reset-confirm/{token}`: set a new password.
pub async fn password_reset_confirm_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<PasswordResetConfirmRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::password_reset_confirm(&state, &token, body).await?;
    Ok(Json(resp))
}

/// `POST /auth/send_mail`: queue a welcome email. Admin only.
pub async fn send_mail_handler(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    let resp = auth::send_welcome_mail(&state, body)?;
    Ok(Json(resp))
}
