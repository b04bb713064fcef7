//! API server configuration.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use jsonwebtoken::Algorithm;
use thiserror::Error;
use url::Url;

use bookly_core::auth::jwt::DEFAULT_REFRESH_TOKEN_EXPIRY_DAYS;

/// Default lifetime of verification and reset links: 1 day.
pub const DEFAULT_ACTION_TOKEN_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Upper bound for `REFRESH_TOKEN_EXPIRY_DAYS`.
pub const MAX_REFRESH_TOKEN_EXPIRY_DAYS: i64 = 365;

/// Upper bound for `ACTION_TOKEN_MAX_AGE_SECS`: 30 days.
pub const MAX_ACTION_TOKEN_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Configuration errors. Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:8000").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Secret for access/refresh token signatures.
    pub jwt_secret: String,
    /// HMAC algorithm for access/refresh tokens.
    pub jwt_algorithm: Algorithm,
    /// Secret for action tokens (verification/reset links).
    pub action_token_secret: String,
    /// Revocation store connection URL.
    pub redis_url: String,
    /// Public base URL used in emailed links, without trailing slash.
    pub domain: String,
    pub refresh_token_expiry: Duration,
    pub action_token_max_age: Duration,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("domain", &self.domain)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("action_token_max_age", &self.action_token_max_age)
            .finish_non_exhaustive()
    }
}

impl ApiConfig {
    /// Reads configuration from the process environment (after `.env`).
    ///
    /// | Variable                     | Default            |
    /// |------------------------------|--------------------|
    /// | `DATABASE_URL`               | required           |
    /// | `JWT_SECRET`                 | required           |
    /// | `JWT_ALGORITHM`              | required (HS*)     |
    /// | `REDIS_URL`                  | required           |
    /// | `DOMAIN`                     | required           |
    /// | `ACTION_TOKEN_SECRET`        | `JWT_SECRET`       |
    /// | `BIND_ADDR`                  | `127.0.0.1:8000`   |
    /// | `REFRESH_TOKEN_EXPIRY_DAYS`  | `2` (at most 365)  |
    /// | `ACTION_TOKEN_MAX_AGE_SECS`  | `86400` (at most 30 days) |
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let jwt_secret = require("JWT_SECRET")?;
        let jwt_algorithm = parse_algorithm(&require("JWT_ALGORITHM")?)?;

        let domain = require("DOMAIN")?;
        Url::parse(&domain).map_err(|e| ConfigError::Invalid {
            var: "DOMAIN",
            reason: e.to_string(),
        })?;

        let refresh_days = parse_bounded(
            "REFRESH_TOKEN_EXPIRY_DAYS",
            get("REFRESH_TOKEN_EXPIRY_DAYS"),
            DEFAULT_REFRESH_TOKEN_EXPIRY_DAYS,
            MAX_REFRESH_TOKEN_EXPIRY_DAYS,
        )?;
        let refresh_token_expiry = Duration::try_days(refresh_days)
            .ok_or_else(|| out_of_range("REFRESH_TOKEN_EXPIRY_DAYS"))?;

        let max_age_secs = parse_bounded(
            "ACTION_TOKEN_MAX_AGE_SECS",
            get("ACTION_TOKEN_MAX_AGE_SECS"),
            DEFAULT_ACTION_TOKEN_MAX_AGE_SECS,
            MAX_ACTION_TOKEN_MAX_AGE_SECS,
        )?;
        let action_token_max_age = Duration::try_seconds(max_age_secs)
            .ok_or_else(|| out_of_range("ACTION_TOKEN_MAX_AGE_SECS"))?;

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8000".into()),
            database_url: require("DATABASE_URL")?,
            action_token_secret: get("ACTION_TOKEN_SECRET").unwrap_or_else(|| jwt_secret.clone()),
            jwt_secret,
            jwt_algorithm,
            redis_url: require("REDIS_URL")?,
            domain: domain.trim_end_matches('/').to_string(),
            refresh_token_expiry,
            action_token_max_age,
        })
    }

    /// Absolute link to an action endpoint, e.g. `verify` + token.
    pub fn action_link(&self, path: &str, token: &str) -> String {
        format!("{}/api/v1/auth/{path}/{token}", self.domain)
    }
}

fn parse_algorithm(value: &str) -> Result<Algorithm, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "JWT_ALGORITHM",
        reason,
    };
    let algorithm = Algorithm::from_str(value.trim()).map_err(|e| invalid(e.to_string()))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(invalid(format!(
            "{other:?} needs a key pair; use HS256, HS384 or HS512"
        ))),
    }
}

fn out_of_range(var: &'static str) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: "out of range".into(),
    }
}

/// Parses a positive integer no larger than `max`.
fn parse_bounded(
    var: &'static str,
    value: Option<String>,
    default: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<i64>() {
        Ok(n) if n > 0 && n <= max => Ok(n),
        Ok(n) if n <= 0 => Err(ConfigError::Invalid {
            var,
            reason: "must be positive".into(),
        }),
        Ok(_) => Err(ConfigError::Invalid {
            var,
            reason: format!("must be at most {max}"),
        }),
        Err(e) => Err(ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/bookly"),
            ("JWT_SECRET", "s3cret"),
            ("JWT_ALGORITHM", "HS256"),
            ("REDIS_URL", "redis://localhost:6379/0"),
            ("DOMAIN", "https://bookly.example/"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<ApiConfig, ConfigError> {
        ApiConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn loads_with_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.jwt_algorithm, Algorithm::HS256);
        assert_eq!(config.action_token_secret, "s3cret");
        assert_eq!(config.domain, "https://bookly.example");
        assert_eq!(config.refresh_token_expiry, Duration::days(2));
        assert_eq!(config.action_token_max_age, Duration::seconds(86400));
    }

    #[test]
    fn each_required_variable_is_fatal_when_missing() {
        for key in ["DATABASE_URL", "JWT_SECRET", "JWT_ALGORITHM", "REDIS_URL", "DOMAIN"] {
            let mut env = base_env();
            env.remove(key);
            match load(&env) {
                Err(ConfigError::Missing(missing)) => assert_eq!(missing, key),
                other => panic!("expected Missing({key}), got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut env = base_env();
        env.insert("JWT_SECRET", "   ");
        assert!(matches!(load(&env), Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn rejects_asymmetric_algorithm() {
        let mut env = base_env();
        env.insert("JWT_ALGORITHM", "RS256");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "JWT_ALGORITHM", .. })
        ));
        env.insert("JWT_ALGORITHM", "nonsense");
        assert!(load(&env).is_err());
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut env = base_env();
        env.insert("REFRESH_TOKEN_EXPIRY_DAYS", "0");
        assert!(load(&env).is_err());
        env.insert("REFRESH_TOKEN_EXPIRY_DAYS", "seven");
        assert!(load(&env).is_err());
        env.insert("REFRESH_TOKEN_EXPIRY_DAYS", "7");
        assert_eq!(load(&env).unwrap().refresh_token_expiry, Duration::days(7));
    }

    #[test]
    fn rejects_durations_beyond_the_caps() {
        let mut env = base_env();
        env.insert("REFRESH_TOKEN_EXPIRY_DAYS", "100000000");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "REFRESH_TOKEN_EXPIRY_DAYS", .. })
        ));

        let mut env = base_env();
        env.insert("ACTION_TOKEN_MAX_AGE_SECS", "100000000000000000");
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { var: "ACTION_TOKEN_MAX_AGE_SECS", .. })
        ));
    }

    #[test]
    fn accepts_durations_at_the_caps() {
        let mut env = base_env();
        env.insert("REFRESH_TOKEN_EXPIRY_DAYS", "365");
        env.insert("ACTION_TOKEN_MAX_AGE_SECS", "2592000");
        let config = load(&env).unwrap();
        assert_eq!(config.refresh_token_expiry, Duration::days(365));
        assert_eq!(config.action_token_max_age, Duration::days(30));
    }

    #[test]
    fn separate_action_secret_is_honoured() {
        let mut env = base_env();
        env.insert("ACTION_TOKEN_SECRET", "other");
        assert_eq!(load(&env).unwrap().action_token_secret, "other");
    }

    #[test]
    fn builds_action_links() {
        let config = load(&base_env()).unwrap();
        assert_eq!(
            config.action_link("verify", "abc.def.ghi"),
            "https://bookly.example/api/v1/auth/verify/abc.def.ghi"
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", load(&base_env()).unwrap());
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("postgres://"));
    }
}
