//! User-record queries used by the auth flows.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{NewUser, User, UserWithPassword};

const USER_COLUMNS: &str = "uid, username, email, first_name, last_name, role, is_verified, \
                            password_hash, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    uid: Uuid,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    role: String,
    is_verified: bool,
    password_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserWithPassword {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse().map_err(AuthError::Internal)?;
        Ok(UserWithPassword {
            user: User {
                uid: row.uid,
                username: row.username,
                email: row.email,
                first_name: row.first_name,
                last_name: row.last_name,
                role,
                is_verified: row.is_verified,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            password_hash: row.password_hash,
        })
    }
}

/// Check whether an email is already registered.
pub async fn user_exists(pool: &PgPool, email: &str) -> Result<bool, AuthError> {
    let exists =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

/// Fetch a user (with password hash) by email.
pub async fn find_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserWithPassword>, AuthError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email)
    .fetch_optional(pool)
    .await?;
    row.map(UserWithPassword::try_from).transpose()
}

/// Fetch a user by uid.
pub async fn find_user_by_uid(pool: &PgPool, uid: Uuid) -> Result<Option<User>, AuthError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE uid = $1"
    ))
    .bind(uid)
    .fetch_optional(pool)
    .await?;
    Ok(row
        .map(UserWithPassword::try_from)
        .transpose()?
        .map(|u| u.user))
}

/// Create a new unverified user with the default role.
pub async fn create_user(pool: &PgPool, new_user: &NewUser<'_>) -> Result<User, AuthError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "INSERT INTO users (username, email, first_name, last_name, password_hash) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
    ))
    .bind(new_user.username)
    .bind(new_user.email)
    .bind(new_user.first_name)
    .bind(new_user.last_name)
    .bind(new_user.password_hash)
    .fetch_one(pool)
    .await?;
    Ok(UserWithPassword::try_from(row)?.user)
}

/// Mark a user's email as verified.
pub async fn mark_verified(pool: &PgPool, uid: Uuid) -> Result<(), AuthError> {
    sqlx::query("UPDATE users SET is_verified = TRUE, updated_at = now() WHERE uid = $1")
        .bind(uid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replace a user's password hash.
pub async fn update_password_hash(
    pool: &PgPool,
    uid: Uuid,
    password_hash: &str,
) -> Result<(), AuthError> {
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE uid = $1")
        .bind(uid)
        .bind(password_hash)
        .execute(pool)
        .await?;
    Ok(())
}
