//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! shapes in `bookly_api::models`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role carried in access tokens and stored on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Domain user (never carries the password hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uid: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

/// Fields required to create a user record.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password_hash: &'a str,
}

/// Identity embedded in signed tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    pub email: String,
    pub user_uid: String,
    /// Absent on refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl TokenUser {
    /// Identity for an access token, including the role.
    pub fn for_access(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            user_uid: user.uid.to_string(),
            role: Some(user.role),
        }
    }

    /// Identity for a refresh token. Refresh tokens never carry a role.
    pub fn for_refresh(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            user_uid: user.uid.to_string(),
            role: None,
        }
    }
}

/// Claims embedded in access and refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user: TokenUser,
    /// Expiry (unix timestamp, seconds).
    pub exp: i64,
    /// Unique token id, used as the revocation key.
    pub jti: String,
    /// `true` for refresh tokens, `false` for access tokens.
    pub refresh: bool,
}

impl TokenClaims {
    /// Seconds until expiry, floored at zero.
    pub fn remaining_secs(&self, now: i64) -> u64 {
        u64::try_from(self.exp - now).unwrap_or(0)
    }
}
