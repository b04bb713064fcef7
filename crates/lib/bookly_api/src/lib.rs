//! # bookly_api
//!
//! HTTP API library for Bookly.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::Router;
use axum::routing::{get, post};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bookly_core::auth::AuthError;
use bookly_core::auth::jwt::TokenCodec;
use bookly_core::auth::revocation::SharedRevocationStore;
use bookly_core::auth::url_token::{ACTION_TOKEN_SALT, UrlSafeTokenCodec};
use bookly_core::mail::MailQueue;
use bookly_core::models::auth::Role;

use crate::config::ApiConfig;
use crate::handlers::{auth, health};
use crate::middleware::auth::{RoleChecker, require_auth, require_role};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL connection pool.
    pub pool: PgPool,
    /// API configuration.
    pub config: ApiConfig,
    /// Access/refresh token codec.
    pub tokens: TokenCodec,
    /// Verification/reset link codec.
    pub action_tokens: UrlSafeTokenCodec,
    /// Revoked token ids and consumed action tokens.
    pub revocations: SharedRevocationStore,
    /// Background mail dispatcher.
    pub mail: MailQueue,
}

impl AppState {
    /// Build the state, deriving both codecs from `config`.
    pub fn new(
        pool: PgPool,
        config: ApiConfig,
        revocations: SharedRevocationStore,
        mail: MailQueue,
    ) -> Result<Self, AuthError> {
        let tokens = TokenCodec::new(config.jwt_secret.as_bytes(), config.jwt_algorithm)?;
        let action_tokens =
            UrlSafeTokenCodec::new(config.action_token_secret.as_bytes(), ACTION_TOKEN_SALT)?;
        Ok(Self {
            pool,
            config,
            tokens,
            action_tokens,
            revocations,
            mail,
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `bookly_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    bookly_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes, or guarded per handler by a bearer extractor
    let public = Router::new()
        .route("/signup", post(auth::signup_handler))
        .route("/verify/{token}", get(auth::verify_handler))
        .route("/login", post(auth::login_handler))
        .route("/refresh_token", get(auth::refresh_handler))
        .route("/logout", get(auth::logout_handler))
        .route(
            "/password-reset-request",
            post(auth::password_reset_request_handler),
        )
        .route(
            "/password-reset-confirm/{token}",
            post(auth::password_reset_confirm_handler),
        );

    // Any signed-in user
    let members = Router::new()
        .route("/me", get(auth::me_handler))
        .layer(axum::middleware::from_fn_with_state(
            RoleChecker::new([Role::Admin, Role::User]),
            require_role,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Admins only
    let admin = Router::new()
        .route("/send_mail", post(auth::send_mail_handler))
        .layer(axum::middleware::from_fn_with_state(
            RoleChecker::new([Role::Admin]),
            require_role,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    let auth_routes = public.merge(members).merge(admin);

    Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health))
        .nest("/api/v1/auth", auth_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
