//! Authentication service: signup, verification, login, token rotation,
//! logout and password reset, delegating to `bookly_core::auth`.

use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use bookly_core::auth::AuthError;
use bookly_core::auth::password::{hash_password_blocking, verify_password_blocking};
use bookly_core::auth::queries;
use bookly_core::auth::url_token::{ActionPurpose, claim_action_token, email_payload};
use bookly_core::mail::{MailMessage, templates};
use bookly_core::models::auth::{NewUser, TokenClaims, TokenUser, User};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    EmailRequest, LoginRequest, LoginResponse, LoginUser, MessageResponse,
    PasswordResetConfirmRequest, PasswordResetRequest, SignupRequest, SignupResponse,
    TokenPairResponse, UserResponse,
};

/// Minimum password length accepted at signup and reset.
const MIN_PASSWORD_LEN: usize = 6;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_signup(body: &SignupRequest) -> AppResult<()> {
    if body.username.trim().is_empty() {
        return Err(AppError::Validation("Username is required".into()));
    }
    if !body.email.contains('@') {
        return Err(AppError::Validation("Email address is invalid".into()));
    }
    validate_password(&body.password)
}

/// Hand a message to the mail worker. Delivery problems never fail the request.
fn dispatch_mail(state: &AppState, message: MailMessage) {
    if let Err(e) = state.mail.enqueue(message) {
        warn!(error = %e, "could not queue mail");
    }
}

/// Revoke `claims.jti` until the token would have expired anyway.
async fn revoke(state: &AppState, claims: &TokenClaims) -> AppResult<()> {
    let ttl = StdDuration::from_secs(claims.remaining_secs(Utc::now().timestamp()));
    state.revocations.add(&claims.jti, ttl).await?;
    Ok(())
}

/// Decode an action token issued for `purpose` and claim it, returning the
/// address it was issued for. Runs before any write, so a link is honoured at
/// most once even under concurrent requests.
async fn redeem_action_token(
    state: &AppState,
    token: &str,
    purpose: ActionPurpose,
) -> AppResult<String> {
    let max_age = state.config.action_token_max_age;
    let action = state.action_tokens.decode(token, max_age)?;
    let email = action
        .email_for(purpose)
        .ok_or(AppError::InvalidToken)?
        .to_string();

    let now = Utc::now().timestamp();
    if !claim_action_token(state.revocations.as_ref(), &action, max_age, now).await? {
        info!(purpose = purpose.as_str(), "action token already used");
        return Err(AppError::InvalidToken);
    }
    Ok(email)
}

fn issue_token_pair(state: &AppState, user: &User) -> AppResult<TokenPairResponse> {
    let access_token = state
        .tokens
        .create_access_token(TokenUser::for_access(user), None, false)?;
    let refresh_token = state.tokens.create_access_token(
        TokenUser::for_refresh(user),
        Some(state.config.refresh_token_expiry),
        true,
    )?;
    Ok(TokenPairResponse {
        access_token,
        refresh_token,
    })
}

fn is_unique_violation(e: &AuthError) -> bool {
    matches!(e, AuthError::DbError(db) if db
        .as_database_error()
        .is_some_and(|d| d.is_unique_violation()))
}

fn token_user_uid(claims: &TokenClaims) -> AppResult<Uuid> {
    Uuid::parse_str(&claims.user.user_uid).map_err(|_| AppError::InvalidToken)
}

// ---------------------------------------------------------------------------
// Public auth operations
// ---------------------------------------------------------------------------

/// Register a new, unverified account and mail a verification link.
pub async fn signup(state: &AppState, body: SignupRequest) -> AppResult<SignupResponse> {
    validate_signup(&body)?;
    let email = body.email.trim().to_string();

    if queries::user_exists(&state.pool, &email).await? {
        return Err(AppError::UserAlreadyExists);
    }

    let password_hash = hash_password_blocking(body.password).await?;
    let user = queries::create_user(
        &state.pool,
        &NewUser {
            username: body.username.trim(),
            email: &email,
            first_name: body.first_name.trim(),
            last_name: body.last_name.trim(),
            password_hash: &password_hash,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::UserAlreadyExists
        } else {
            AppError::from(e)
        }
    })?;

    let token = state
        .action_tokens
        .create_url_safe_token(&email_payload(&email, ActionPurpose::VerifyEmail))?;
    let link = state.config.action_link("verify", &token);
    dispatch_mail(state, templates::verify_email(&email, &link));

    info!(uid = %user.uid, "account created");
    Ok(SignupResponse {
        message: "Account created! Check your email to verify your account.".into(),
        user: user.into(),
    })
}

/// Confirm an email address from a verification link.
pub async fn verify_email(state: &AppState, token: &str) -> AppResult<MessageResponse> {
    let email = redeem_action_token(state, token, ActionPurpose::VerifyEmail).await?;

    let user = queries::find_user_by_email(&state.pool, &email)
        .await?
        .ok_or(AppError::UserNotFound)?
        .user;

    if user.is_verified {
        return Ok(MessageResponse::new("Account already verified"));
    }

    queries::mark_verified(&state.pool, user.uid).await?;
    dispatch_mail(state, templates::account_verified(&user.email, &user.first_name));

    info!(uid = %user.uid, "account verified");
    Ok(MessageResponse::new("Account verified successfully"))
}

/// Authenticate with email + password and issue an access/refresh pair.
pub async fn login(state: &AppState, body: LoginRequest) -> AppResult<LoginResponse> {
    let found = queries::find_user_by_email(&state.pool, body.email.trim())
        .await?
        .ok_or(AppError::UserNotFound)?;

    if !verify_password_blocking(body.password, found.password_hash).await? {
        return Err(AppError::InvalidCredentials);
    }

    let user = found.user;
    if !user.is_verified {
        return Err(AppError::AccountNotVerified);
    }

    let tokens = issue_token_pair(state, &user)?;
    info!(uid = %user.uid, "login successful");
    Ok(LoginResponse {
        message: "Login successful".into(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        user: LoginUser {
            email: user.email,
            uid: user.uid,
        },
    })
}

/// Rotate a refresh token: revoke it and issue a fresh pair carrying the
/// user's current role.
pub async fn refresh(state: &AppState, claims: &TokenClaims) -> AppResult<TokenPairResponse> {
    let uid = token_user_uid(claims)?;
    revoke(state, claims).await?;

    let user = queries::find_user_by_uid(&state.pool, uid)
        .await?
        .ok_or(AppError::UserNotFound)?;
    issue_token_pair(state, &user)
}

/// Revoke the presented access token.
pub async fn logout(state: &AppState, claims: &TokenClaims) -> AppResult<MessageResponse> {
    revoke(state, claims).await?;
    info!(jti = %claims.jti, "logged out");
    Ok(MessageResponse::new("Logged out successfully"))
}

/// The user record behind an access token.
pub async fn current_user(state: &AppState, claims: &TokenClaims) -> AppResult<UserResponse> {
    let uid = token_user_uid(claims)?;
    let user = queries::find_user_by_uid(&state.pool, uid)
        .await?
        .ok_or(AppError::UserNotFound)?;
    Ok(user.into())
}

/// Mail a password reset link. Answers the same whether or not the address
/// is registered.
pub fn password_reset_request(
    state: &AppState,
    body: PasswordResetRequest,
) -> AppResult<MessageResponse> {
    let email = body.email.trim();
    let token = state
        .action_tokens
        .create_url_safe_token(&email_payload(email, ActionPurpose::PasswordReset))?;
    let link = state.config.action_link("password-reset-confirm", &token);
    dispatch_mail(state, templates::password_reset(email, &link));
    Ok(MessageResponse::new(
        "Password reset email sent! Check your inbox.",
    ))
}

/// Set a new password from a reset link.
pub async fn password_reset_confirm(
    state: &AppState,
    token: &str,
    body: PasswordResetConfirmRequest,
) -> AppResult<MessageResponse> {
    if body.new_password != body.confirm_new_password {
        return Err(AppError::Validation("Passwords do not match".into()));
    }
    validate_password(&body.new_password)?;

    let email = redeem_action_token(state, token, ActionPurpose::PasswordReset).await?;

    let user = queries::find_user_by_email(&state.pool, &email)
        .await?
        .ok_or(AppError::UserNotFound)?
        .user;

    let password_hash = hash_password_blocking(body.new_password).await?;
    queries::update_password_hash(&state.pool, user.uid, &password_hash).await?;

    info!(uid = %user.uid, "password reset");
    Ok(MessageResponse::new("Password reset successfully"))
}

/// Queue a welcome email to each address.
pub fn send_welcome_mail(state: &AppState, body: EmailRequest) -> AppResult<MessageResponse> {
    if body.addresses.is_empty() {
        return Err(AppError::Validation("At least one address is required".into()));
    }
    state.mail.enqueue(templates::welcome(body.addresses))?;
    Ok(MessageResponse::new("Email sent successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_length_is_counted_in_chars() {
        assert!(validate_password("12345").is_err());
        assert!(validate_password("123456").is_ok());
        assert!(validate_password("éééééé").is_ok());
    }

    #[test]
    fn signup_validation() {
        let mut body = SignupRequest {
            username: "reader".into(),
            email: "a@x.com".into(),
            first_name: "Ada".into(),
            last_name: "L".into(),
            password: "long-enough".into(),
        };
        assert!(validate_signup(&body).is_ok());

        body.email = "not-an-email".into();
        assert!(matches!(validate_signup(&body), Err(AppError::Validation(_))));

        body.email = "a@x.com".into();
        body.username = "  ".into();
        assert!(validate_signup(&body).is_err());
    }

    #[test]
    fn unique_violation_detection_ignores_other_errors() {
        assert!(!is_unique_violation(&AuthError::InvalidToken));
        assert!(!is_unique_violation(&AuthError::DbError(sqlx::Error::RowNotFound)));
    }
}
